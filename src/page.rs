//! Status page rendering
//!
//! Turns a [`StatusView`] into the single HTML page of the web UI: pending
//! error, start form, running forwards, and the event log. Every interpolated
//! value is escaped.

use crate::supervisor::StatusView;
use std::fmt::Write;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render the full status page
pub fn render_status(view: &StatusView) -> String {
    let mut body = String::new();

    if let Some(ref error) = view.error {
        let _ = write!(body, r#"<div class="error">{}</div>"#, escape_html(error));
    }

    body.push_str(START_FORM);
    render_forwards(&mut body, view);
    render_events(&mut body, view);

    PAGE_TEMPLATE.replace("{{body}}", &body)
}

fn render_forwards(out: &mut String, view: &StatusView) {
    out.push_str("<h2>Active Forwards</h2>\n");
    if view.forwards.is_empty() {
        out.push_str(r#"<p class="empty">No forwards running.</p>"#);
        out.push('\n');
        return;
    }

    out.push_str(
        "<table>\n<tr><th>ID</th><th>PID</th><th>Base</th><th>Remote</th><th>Started</th><th></th></tr>\n",
    );
    for forward in &view.forwards {
        let id = escape_html(&forward.id);
        let _ = writeln!(
            out,
            r#"<tr><td><code>{id}</code></td><td>{pid}</td><td>{base}</td><td>{remote}</td><td>{started}</td><td><a class="stop" href="/stop?id={query}">Stop</a></td></tr>"#,
            id = id,
            pid = forward.pid,
            base = escape_html(&endpoint(&forward.base_ip, forward.base_port)),
            remote = escape_html(&endpoint(&forward.remote_ip, forward.remote_port)),
            started = forward.started_at.format(TIME_FORMAT),
            query = escape_html(&urlencoding::encode(&forward.id)),
        );
    }
    out.push_str("</table>\n");
}

fn render_events(out: &mut String, view: &StatusView) {
    out.push_str("<h2>Event Log</h2>\n");
    if view.events.is_empty() {
        out.push_str(r#"<p class="empty">No events yet.</p>"#);
        out.push('\n');
        return;
    }

    out.push_str("<table>\n<tr><th>Time</th><th>Event</th><th>Details</th></tr>\n");
    for entry in &view.events {
        let _ = writeln!(
            out,
            r#"<tr class="event-{kind_class}"><td>{time}</td><td>{kind}</td><td>{details}</td></tr>"#,
            kind_class = entry.kind.to_string().to_lowercase(),
            time = entry.timestamp.format(TIME_FORMAT),
            kind = entry.kind,
            details = escape_html(&entry.details),
        );
    }
    out.push_str("</table>\n");
}

/// `ip:port`, bracketing IPv6 addresses
fn endpoint(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("[{}]:{}", ip, port)
    } else {
        format!("{}:{}", ip, port)
    }
}

/// Escape text for use in HTML content and quoted attributes
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const START_FORM: &str = r#"<h2>Start Forward</h2>
<form method="post" action="/start">
    <label>Base IP <input name="baseIP" placeholder="0.0.0.0" required></label>
    <label>Base Port <input name="basePort" placeholder="8000" required></label>
    <label>Remote IP <input name="remoteIP" placeholder="10.0.0.5" required></label>
    <label>Remote Port <input name="remotePort" placeholder="22" required></label>
    <button type="submit">Start</button>
</form>
"#;

const PAGE_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Forwardgate</title>
    <style>
        body { font-family: sans-serif; margin: 2rem; color: #222; }
        table { border-collapse: collapse; margin-bottom: 2rem; }
        th, td { border: 1px solid #ccc; padding: 0.3rem 0.6rem; text-align: left; }
        form label { margin-right: 1rem; }
        .error { background: #fdd; border: 1px solid #c00; padding: 0.6rem; margin-bottom: 1rem; }
        .empty { color: #777; }
        .event-died td { color: #a00; }
        a.stop { color: #a00; }
    </style>
</head>
<body>
<h1>Forwardgate</h1>
{{body}}
</body>
</html>
"##;
