//! Development server for the guest runner page
//!
//! Serves `www/` (or the directory given as the second argument), so the
//! runner page, the bridge's wasm-bindgen output and guest `.wasm` bundles
//! load from one origin.

use std::fs;
use std::path::{Component, Path, PathBuf};
use tiny_http::{Header, Response, Server};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ROOT: &str = "www";

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut args = std::env::args().skip(1);
    let port = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let root = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_ROOT.to_string()));

    let addr = format!("0.0.0.0:{}", port);
    let server = Server::http(&addr)?;

    println!("sysbridge dev server");
    println!("  root: {}", root.display());
    println!("  http://localhost:{}", port);

    for request in server.incoming_requests() {
        let response = match resolve(&root, request.url()) {
            Some(path) => serve_file(&path),
            None => not_found(),
        };
        sysbridge::console_log!("{} {} -> {}", request.method(), request.url(), response.status_code().0);
        let _ = request.respond(response);
    }
    Ok(())
}

/// Map a request URL onto a file under `root`; `..` segments are refused
fn resolve(root: &Path, url: &str) -> Option<PathBuf> {
    let url_path = url.split(['?', '#']).next().unwrap_or("/");
    let relative = match url_path.trim_start_matches('/') {
        "" => "index.html",
        other => other,
    };

    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

fn content_type(mime: &str) -> Option<Header> {
    Header::from_bytes("Content-Type", mime).ok()
}

fn serve_file(path: &Path) -> Response<std::io::Cursor<Vec<u8>>> {
    match fs::read(path) {
        Ok(contents) => {
            let response = Response::from_data(contents);
            match content_type(mime_type(path)) {
                Some(header) => response.with_header(header),
                None => response,
            }
        }
        Err(_) => not_found(),
    }
}

fn not_found() -> Response<std::io::Cursor<Vec<u8>>> {
    let response = Response::from_string("404 Not Found").with_status_code(404);
    match content_type("text/plain") {
        Some(header) => response.with_header(header),
        None => response,
    }
}

fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("wasm") => "application/wasm",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
