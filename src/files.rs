//! Static file serving.
//!
//! Mounted by [`Service::register_file_server`](crate::Service::register_file_server)
//! as a catch-all route: everything after the mount prefix is resolved
//! relative to the served directory. Directories serve their `index.html`,
//! the mount point itself included.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use http::StatusCode;
use percent_encoding::percent_decode_str;
use tracing::error;

use crate::handler::{BoxFuture, ErasedHandler};
use crate::request::Request;
use crate::response::{ContentType, Response};

/// Name of the catch-all parameter holding the file path.
pub(crate) const PARAM: &str = "file_path";

const NOT_FOUND_BODY: &str = "404 page not found";

pub(crate) struct FileServer {
    root: Arc<PathBuf>,
}

impl FileServer {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self { root: Arc::new(root) }
    }
}

impl ErasedHandler for FileServer {
    fn call(&self, req: Request) -> BoxFuture {
        let root = Arc::clone(&self.root);
        // absent on the routes for the mount point itself
        let raw = req.param(PARAM).unwrap_or_default().to_owned();
        Box::pin(async move { serve(&root, &raw).await })
    }
}

/// Serves the file at `raw`, the still percent-encoded path below the mount.
async fn serve(root: &Path, raw: &str) -> Response {
    let Ok(relative) = percent_decode_str(raw).decode_utf8() else {
        return not_found();
    };
    let Some(mut path) = resolve(root, &relative) else {
        return not_found();
    };

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_dir() => path.push("index.html"),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return not_found(),
        Err(e) => return read_failed(&path, e),
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let content_type = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(ContentType::OctetStream, ContentType::from_extension);
            Response::builder().bytes(content_type, bytes)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => not_found(),
        Err(e) => read_failed(&path, e),
    }
}

/// Joins `relative` onto `root`, refusing anything that climbs out of it.
fn resolve(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(path)
}

fn not_found() -> Response {
    Response::builder().status(StatusCode::NOT_FOUND).text(NOT_FOUND_BODY)
}

fn read_failed(path: &Path, e: std::io::Error) -> Response {
    error!(path = %path.display(), "failed to read static file: {e}");
    Response::status(StatusCode::INTERNAL_SERVER_ERROR)
}
