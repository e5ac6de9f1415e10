//! Static viewer bundle. The real HTML/CSS/JS is served verbatim to the
//! browser and is explicitly out of scope for the core — this is
//! a minimal placeholder so `GET /` returns something renderable.

pub const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>dockhand review</title>
</head>
<body>
  <div id="app">Connect a WebSocket to this page's origin to drive the diff review protocol.</div>
</body>
</html>
"#;
