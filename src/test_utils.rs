use std::io::Read;
use std::net::SocketAddr;
use std::thread::JoinHandle;
use std::time::Duration;

use tiny_http::{Header, Response, Server};

/// A request captured by [`StubServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Serves canned JSON responses, one per incoming request, in order.
pub struct StubServer {
    pub base_url: String,
    handle: JoinHandle<Vec<RecordedRequest>>,
}

impl StubServer {
    /// `responses` receives the base url so paginated bodies can point back
    /// at the stub.
    pub fn start<F>(responses: F) -> Self
    where
        F: FnOnce(&str) -> Vec<(u16, String)>,
    {
        let server = Server::http("127.0.0.1:0").unwrap();
        let address = server.server_addr().to_ip().unwrap();
        let base_url = format!("http://{}", address);
        let responses = responses(&base_url);
        let handle = std::thread::spawn(move || {
            let mut recorded = vec![];
            for (status, body) in responses {
                let mut request = match server.recv_timeout(Duration::from_secs(5)) {
                    Ok(Some(request)) => request,
                    _ => break,
                };
                let mut request_body = String::new();
                let _ = request.as_reader().read_to_string(&mut request_body);
                recorded.push(RecordedRequest {
                    method: request.method().to_string(),
                    url: request.url().to_string(),
                    headers: request
                        .headers()
                        .iter()
                        .map(|header| (header.field.to_string(), header.value.to_string()))
                        .collect(),
                    body: request_body,
                });
                let content_type =
                    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
                let response = Response::from_string(body)
                    .with_status_code(status)
                    .with_header(content_type);
                let _ = request.respond(response);
            }
            recorded
        });
        Self { base_url, handle }
    }

    pub fn finish(self) -> Vec<RecordedRequest> {
        self.handle.join().unwrap()
    }
}

/// Sends a GET to the OAuth callback listener and returns the status code.
pub fn get_callback(address: SocketAddr, path: &str) -> u16 {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
        .get(format!("http://{}{}", address, path))
        .send()
        .unwrap()
        .status()
        .as_u16()
}
