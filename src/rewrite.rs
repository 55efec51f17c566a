//! Insertion of the show hook after `pyplot` imports.
//!
//! The plotting module may be imported for the first time by the submitted
//! code itself, so the hook cannot be installed once up front. Instead every
//! import site gets a call to the hook installer right after it. Detection is
//! line based and only recognizes the conventional spellings:
//!
//! ```text
//! import matplotlib.pyplot
//! import matplotlib.pyplot as plt
//! from matplotlib import pyplot [as plt]
//! ```
//!
//! Imports spelled any other way (multiple modules on one line,
//! `from matplotlib.pyplot import show`, `;`-joined statements) are not
//! rewritten. Figures from such code are still picked up by the capture that
//! runs when the code finishes.

use regex::Regex;
use std::sync::LazyLock;

/// Statement inserted after each detected import.
pub const HOOK_CALL: &str = "_pyworker.install_show_hook()";

static PYPLOT_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([ \t]*)(?:import[ \t]+matplotlib\.pyplot(?:[ \t]+as[ \t]+\w+)?|from[ \t]+matplotlib[ \t]+import[ \t]+pyplot(?:[ \t]+as[ \t]+\w+)?)[ \t]*(?:#.*)?$",
    )
    .expect("pyplot import pattern is valid")
});

/// Returns `source` with a hook call after every recognized `pyplot` import.
///
/// Original lines are kept byte for byte and in order; source without such an
/// import comes back unchanged.
pub fn rewrite(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.split_inclusive('\n') {
        out.push_str(line);

        let (body, ending) = split_line_ending(line);
        let Some(caps) = PYPLOT_IMPORT.captures(body) else {
            continue;
        };
        let indent = caps.get(1).map_or("", |m| m.as_str());
        if ending.is_empty() {
            out.push('\n');
        }
        out.push_str(indent);
        out.push_str(HOOK_CALL);
        out.push_str(ending);
    }
    out
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}
