use std::sync::Arc;
use std::time::Duration;

use super::FetchFailure;
use crate::media::DecodedFrame;
use crate::media::decoder;

/// Largest frame file accepted over HTTP.
const MAX_FRAME_BYTES: u64 = 32 * 1024 * 1024;

/// Fetches and decodes one frame file.
pub trait FrameLoader: Send + Sync {
    fn load(&self, uri: &str) -> Result<DecodedFrame, FetchFailure>;
}

/// Loads frames over plain HTTP(S).
pub struct HttpFrameLoader {
    agent: ureq::Agent,
}

impl HttpFrameLoader {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }
}

impl FrameLoader for HttpFrameLoader {
    fn load(&self, uri: &str) -> Result<DecodedFrame, FetchFailure> {
        let mut response = self.agent.get(uri).call().map_err(|e| match e {
            ureq::Error::StatusCode(code) => FetchFailure::Status(code),
            other => FetchFailure::Network(other.to_string()),
        })?;
        let bytes = response
            .body_mut()
            .with_config()
            .limit(MAX_FRAME_BYTES)
            .read_to_vec()
            .map_err(|e| FetchFailure::Network(e.to_string()))?;
        decoder::decode_image(&bytes, decoder::format_from_uri(uri)).map_err(FetchFailure::Decode)
    }
}

/// Loads frames from the local filesystem; the URI is a path.
pub struct FileFrameLoader;

impl FrameLoader for FileFrameLoader {
    fn load(&self, uri: &str) -> Result<DecodedFrame, FetchFailure> {
        let bytes = std::fs::read(uri).map_err(|e| FetchFailure::Io(format!("{uri}: {e}")))?;
        decoder::decode_image(&bytes, decoder::format_from_uri(uri)).map_err(FetchFailure::Decode)
    }
}

pub fn is_remote(base: &str) -> bool {
    base.starts_with("http://") || base.starts_with("https://")
}

/// Pick the loader that matches where the manifest lives.
pub fn loader_for(base: &str, timeout: Duration) -> Arc<dyn FrameLoader> {
    if is_remote(base) {
        Arc::new(HttpFrameLoader::new(timeout))
    } else {
        Arc::new(FileFrameLoader)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::media::decoder::encode_png;

    /// Serve one canned HTTP response on a local port.
    fn serve_once(status: &str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Type: image/png\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
            stream.flush().unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn remote_detection() {
        assert!(is_remote("https://cdn.example.com/frames"));
        assert!(is_remote("http://localhost:8080"));
        assert!(!is_remote("frames"));
        assert!(!is_remote("/var/www/frames"));
    }

    #[test]
    fn file_loader_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_0000.png");
        std::fs::write(&path, encode_png(2, 2, [9, 8, 7, 255])).unwrap();

        let frame = FileFrameLoader.load(path.to_str().unwrap()).unwrap();
        assert_eq!((frame.width, frame.height), (2, 2));
        assert_eq!(&frame.data[..4], &[9, 8, 7, 255]);
    }

    #[test]
    fn file_loader_missing_file_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_9999.webp");
        let err = FileFrameLoader.load(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, FetchFailure::Io(_)));
    }

    #[test]
    fn file_loader_corrupt_file_is_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_0001.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        let err = FileFrameLoader.load(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, FetchFailure::Decode(_)));
    }

    #[test]
    fn http_loader_decodes_body() {
        let base = serve_once("200 OK", encode_png(1, 1, [1, 2, 3, 255]));
        let loader = HttpFrameLoader::new(Duration::from_secs(5));
        let frame = loader.load(&format!("{base}/frame_0000.png")).unwrap();
        assert_eq!(frame.data, vec![1, 2, 3, 255]);
    }

    #[test]
    fn http_loader_maps_status_codes() {
        let base = serve_once("404 Not Found", Vec::new());
        let loader = HttpFrameLoader::new(Duration::from_secs(5));
        let err = loader.load(&format!("{base}/frame_0000.png")).unwrap_err();
        assert_eq!(err, FetchFailure::Status(404));
    }
}
