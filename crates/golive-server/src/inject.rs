//! Reload client injection for HTML pages.

/// Script appended to every served HTML page.
///
/// Connects back to the serving host over WebSocket and reloads the page when
/// it receives the reload payload.
pub const RELOAD_SNIPPET: &str = r"
<script>
(function () {
  var protocol = window.location.protocol === 'https:' ? 'wss' : 'ws';
  var socket = new WebSocket(protocol + '://' + window.location.host);
  socket.onmessage = function (event) {
    if (event.data === 'reload') {
      window.location.reload();
    }
  };
})();
</script>
";

/// Insert [`RELOAD_SNIPPET`] before the first `</head>` (case-insensitive).
///
/// Documents without a closing head tag get the snippet appended. Everything
/// else in the document is left untouched.
pub fn inject_reload_snippet(html: &str) -> String {
    let mut out = String::with_capacity(html.len() + RELOAD_SNIPPET.len());
    // ASCII lowercasing keeps byte offsets aligned with the input
    match html.to_ascii_lowercase().find("</head>") {
        Some(pos) => {
            out.push_str(&html[..pos]);
            out.push_str(RELOAD_SNIPPET);
            out.push_str(&html[pos..]);
        }
        None => {
            out.push_str(html);
            out.push_str(RELOAD_SNIPPET);
        }
    }
    out
}
