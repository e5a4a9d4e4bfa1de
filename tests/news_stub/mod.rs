use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

pub const API_KEY: &str = "test-key";

/// Serves a paginated search API, the article pages it links to, and a
/// magazine homepage with its story pages.
pub struct NewsStub {
    pub base_url: String,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl NewsStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start news stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");
        let page_base = base_url.clone();

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let parsed = url::Url::parse(&format!("http://stub{}", request.url()))
                    .expect("parse request url");
                let query: HashMap<String, String> = parsed
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();

                let (status, content_type, body) = match parsed.path() {
                    "/search" => search_response(&page_base, &query),
                    "/world/2015/mar/02/b-story" => (
                        200,
                        "text/html; charset=utf-8",
                        r#"<!doctype html>
<html><body>
  <nav><p>Menu</p></nav>
  <div class="content__article-body">
    <p>B scraped paragraph one.</p>
    <p>B scraped paragraph two.<br></p>
  </div>
</body></html>
"#
                        .to_owned(),
                    ),
                    "/world/2015/mar/03/d-story" => (
                        200,
                        "text/html; charset=utf-8",
                        "<!doctype html><html><body><main><p>Redesigned page</p></main></body></html>"
                            .to_owned(),
                    ),
                    "/atlantic/" => (200, "text/html; charset=utf-8", ATLANTIC_HOMEPAGE.to_owned()),
                    path => match atlantic_story(path) {
                        Some(html) => (200, "text/html; charset=utf-8", html),
                        None => (404, "text/plain", "not found".to_owned()),
                    },
                };

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                        .expect("build header");
                let response = tiny_http::Response::from_string(body)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for NewsStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn search_response(
    base_url: &str,
    query: &HashMap<String, String>,
) -> (u16, &'static str, String) {
    if query.get("api-key").map(String::as_str) != Some(API_KEY) {
        return (
            401,
            "application/json",
            r#"{"response":{"status":"error","message":"Invalid authentication credentials"}}"#
                .to_owned(),
        );
    }
    if query.get("section").map(String::as_str) != Some("world")
        || query.get("from-date").map(String::as_str) != Some("2015-03-01")
        || query.get("show-fields").map(String::as_str) != Some("body")
    {
        return (
            400,
            "application/json",
            r#"{"response":{"status":"error","message":"unexpected query"}}"#.to_owned(),
        );
    }

    let page = query
        .get("page")
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(1);
    let results = match page {
        1 => serde_json::json!([
            {
                "id": "world/2015/mar/01/a-story",
                "webTitle": "A story",
                "webPublicationDate": "2015-03-01T10:00:00Z",
                "webUrl": format!("{base_url}/world/2015/mar/01/a-story"),
                "sectionName": "World news",
                "fields": { "body": "<p>A embedded body.</p>" }
            },
            {
                "id": "world/live/2015/mar/01/live-blog",
                "webTitle": "Live: everything happening",
                "webPublicationDate": "2015-03-01T11:00:00Z",
                "webUrl": format!("{base_url}/world/live/2015/mar/01/live-blog"),
                "sectionName": "World news"
            }
        ]),
        2 => serde_json::json!([
            {
                "id": "world/2015/mar/02/b-story",
                "webTitle": "B story",
                "webPublicationDate": "2015-03-02T09:30:00Z",
                "webUrl": format!("{base_url}/world/2015/mar/02/b-story"),
                "sectionName": "World news",
                "fields": {}
            },
            {
                "id": "crosswords/cryptic/26512",
                "webTitle": "Cryptic crossword",
                "webPublicationDate": "2015-03-02T00:00:00Z",
                "webUrl": format!("{base_url}/crosswords/cryptic/26512"),
                "sectionName": "Crosswords"
            }
        ]),
        3 => serde_json::json!([
            {
                "id": "world/2015/mar/03/d-story",
                "webTitle": "D story",
                "webPublicationDate": "2015-03-03T08:00:00Z",
                "webUrl": format!("{base_url}/world/2015/mar/03/d-story"),
                "sectionName": "World news"
            }
        ]),
        _ => serde_json::json!([]),
    };

    let body = serde_json::json!({
        "response": {
            "status": "ok",
            "currentPage": page,
            "pageSize": 2,
            "pages": 3,
            "results": results,
        }
    });
    (200, "application/json", body.to_string())
}

const ATLANTIC_HOMEPAGE: &str = r#"<!doctype html>
<html><body>
<ul id="nav-channels">
  <li class="nav-channel politics">
    <ul>
      <li class="dropdown-item"><a href="/politics/archive/2015/03/fresh/1/">Fresh</a></li>
      <li class="dropdown-item"><a href="/politics/archive/2015/02/old/2/">Old</a></li>
      <li class="dropdown-item"><a href="/politics/archive/2015/03/no-meta/3/">No meta</a></li>
      <li class="dropdown-item"><a href="/politics/archive/2015/03/no-body/4/">No body</a></li>
    </ul>
  </li>
  <li class="nav-channel business">
    <ul><li class="dropdown-item"><a href="/business/archive/2015/03/biz/5/">Biz</a></li></ul>
  </li>
</ul>
</body></html>
"#;

fn atlantic_story(path: &str) -> Option<String> {
    let meta = |title: &str, pub_date: &str| {
        format!(
            r#"<meta name="parsely-page" content='{{"title": "{title}", "pub_date": "{pub_date}", "section": "Politics"}}'>"#
        )
    };
    let body = |text: &str| {
        format!(
            r#"<div class="article-content" itemprop="articleBody"><p>{text}</p><aside>Related links</aside></div>"#
        )
    };
    let page = |head: String, body: String| {
        format!("<!doctype html><html><head>{head}</head><body>{body}</body></html>")
    };

    match path {
        "/politics/archive/2015/03/fresh/1/" => Some(page(
            meta("Fresh politics", "2015-03-02T10:00:00Z"),
            body("Fresh body."),
        )),
        "/politics/archive/2015/02/old/2/" => Some(page(
            meta("Old politics", "2015-02-01T10:00:00Z"),
            body("Old body."),
        )),
        "/politics/archive/2015/03/no-meta/3/" => Some(page(String::new(), body("Orphan body."))),
        "/politics/archive/2015/03/no-body/4/" => Some(page(
            meta("Bodiless politics", "2015-03-02T11:00:00Z"),
            "<main><p>Paywall</p></main>".to_owned(),
        )),
        "/business/archive/2015/03/biz/5/" => Some(page(
            meta("Business story", "2015-03-02T12:00:00Z"),
            body("Biz body."),
        )),
        _ => None,
    }
}
