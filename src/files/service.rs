//! Static file [`Handler`].

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use futures_util::future::BoxFuture;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::files::mime::content_type;
use crate::files::path::{resolve, PathError};
use crate::files::range::{parse_range, RangeOutcome};
use crate::http::{Handler, HandlerError, Method, Reply, Request, RequestBody, Response};

/// Serves files below a document root.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    strip_prefix: Option<String>,
    index: String,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            strip_prefix: None,
            index: "index.html".to_string(),
        }
    }

    /// Remove `prefix` from request paths before resolving them.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        self.strip_prefix = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative<'p>(&self, path: &'p str) -> Option<&'p str> {
        match &self.strip_prefix {
            None => Some(path),
            Some(prefix) => {
                let rest = path.strip_prefix(prefix.as_str())?;
                (rest.is_empty() || rest.starts_with('/')).then_some(rest)
            }
        }
    }

    async fn serve(&self, request: &Request) -> Result<Response, HandlerError> {
        if !matches!(request.method, Method::Get | Method::Head) {
            return Ok(Response::error(405).with_header("Allow", "GET, HEAD"));
        }
        let Some(relative) = self.relative(request.path()) else {
            return Ok(Response::error(404));
        };
        let mut path = match resolve(&self.root, relative) {
            Ok(path) => path,
            Err(PathError::BadEncoding) => return Ok(Response::error(400)),
            Err(e) => {
                tracing::debug!(target = %request.target, error = %e, "Rejected file path");
                return Ok(Response::error(403));
            }
        };

        let mut metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => return io_response(e),
        };
        if metadata.is_dir() {
            path.push(&self.index);
            metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => return Ok(Response::error(404)),
                Err(e) => return io_response(e),
            };
        }

        let len = metadata.len();
        let etag = entity_tag(len, &metadata);
        if let Some(candidates) = request.headers.get("if-none-match") {
            if etag_matches(candidates, &etag) {
                return Ok(Response::new(304).with_header("ETag", etag));
            }
        }

        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) => return io_response(e),
        };
        let response = Response::new(200)
            .with_header("Content-Type", content_type(&path))
            .with_header("ETag", etag)
            .with_header("Accept-Ranges", "bytes");

        match parse_range(request.headers.get("range"), len) {
            RangeOutcome::Full => Ok(response.with_reader(len, file.take(len))),
            RangeOutcome::Partial { start, end } => {
                file.seek(SeekFrom::Start(start)).await?;
                let count = end - start + 1;
                let mut response = response.with_reader(count, file.take(count));
                response.status = 206;
                Ok(response.with_header("Content-Range", format!("bytes {start}-{end}/{len}")))
            }
            RangeOutcome::Unsatisfiable => Ok(Response::error(416)
                .with_header("Content-Range", format!("bytes */{len}"))),
        }
    }
}

impl Handler for StaticFiles {
    fn call<'a>(
        &'a self,
        request: &'a Request,
        _body: RequestBody<'a>,
    ) -> BoxFuture<'a, Result<Reply, HandlerError>> {
        Box::pin(async move { self.serve(request).await.map(Reply::from) })
    }
}

fn io_response(e: io::Error) -> Result<Response, HandlerError> {
    match e.kind() {
        io::ErrorKind::NotFound => Ok(Response::error(404)),
        io::ErrorKind::PermissionDenied => Ok(Response::error(403)),
        _ => Err(e.into()),
    }
}

fn entity_tag(len: u64, metadata: &std::fs::Metadata) -> String {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("\"{len:x}-{mtime:x}\"")
}

fn etag_matches(candidates: &str, etag: &str) -> bool {
    candidates.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{BodySource, Headers, ResponseBody, Version};
    use std::io::Write;

    #[test]
    fn etag_comparison_is_weak() {
        let etag = "\"5-abc\"";
        assert!(etag_matches("\"5-abc\"", etag));
        assert!(etag_matches("\"x\", W/\"5-abc\"", etag));
        assert!(etag_matches("*", etag));
        assert!(!etag_matches("\"5-abd\"", etag));
    }

    #[test]
    fn prefix_is_stripped_on_segment_boundary() {
        let files = StaticFiles::new("/srv").with_prefix("/static/");
        assert_eq!(files.relative("/static/a.css"), Some("/a.css"));
        assert_eq!(files.relative("/static"), Some(""));
        assert_eq!(files.relative("/staticky"), None);
        assert_eq!(files.relative("/other"), None);
    }

    #[tokio::test]
    async fn whole_file_body_stops_at_the_advertised_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grows.txt");
        std::fs::write(&path, b"hello").unwrap();

        let request = Request {
            method: Method::Get,
            target: "/grows.txt".to_string(),
            version: Version::HTTP_11,
            headers: Headers::new(),
        };
        let response = StaticFiles::new(dir.path()).serve(&request).await.unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b" and more").unwrap();

        let ResponseBody::Fixed { len, source: BodySource::Reader(mut reader) } = response.body
        else {
            panic!("expected a streamed body");
        };
        assert_eq!(len, 5);
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"hello");
    }
}
