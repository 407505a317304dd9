//! Quoting for supervisor command lines and unit names.

/// Renders an argument vector as an `ExecStart=`-style command line.
///
/// Every argument is double-quoted with backslashes, quotes and newlines
/// escaped. Arguments after the binary also get `$` doubled so the
/// supervisor does not expand them as variables.
pub fn quote_exec(exec: &[String]) -> String {
    exec.iter()
        .enumerate()
        .map(|(i, arg)| {
            let mut escaped = String::with_capacity(arg.len() + 2);
            escaped.push('"');
            for c in arg.chars() {
                match c {
                    '\\' => escaped.push_str("\\\\"),
                    '"' => escaped.push_str("\\\""),
                    '\'' => escaped.push_str("\\'"),
                    '\n' => escaped.push_str("\\n"),
                    '$' if i > 0 => escaped.push_str("$$"),
                    other => escaped.push(other),
                }
            }
            escaped.push('"');
            escaped
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escapes a path for use in a unit name, like `systemd-escape --path`.
///
/// `/opt/stage2/web/rootfs` becomes `opt-stage2-web-rootfs`; the root path
/// becomes `-`.
pub fn unit_name_path_escape(path: &str) -> String {
    let trimmed: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if trimmed.is_empty() {
        return "-".to_string();
    }
    let joined = trimmed.join("/");

    let mut out = String::with_capacity(joined.len());
    for (i, b) in joined.bytes().enumerate() {
        match b {
            b'/' => out.push('-'),
            b'.' if i == 0 => out.push_str("\\x2e"),
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b':' | b'_' | b'.' => out.push(b as char),
            other => out.push_str(&format!("\\x{other:02x}")),
        }
    }
    out
}
