//! Deterministic transports for unit tests.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture};
use hickory_proto::ProtoErrorKind;
use hickory_proto::op::{Message, MessageType, Query};
use hickory_proto::rr::{Name, RData, Record, rdata::A};
use http::{Request, Response, StatusCode, Uri};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, UdpSocket};

use crate::{Context, Version, dns, http as http_resolver};

#[derive(Debug, Clone)]
pub enum DnsReply {
    Answer(RData),
    Delayed(Duration, RData),
    Empty,
    Fail,
    Hang,
}

/// DNS transport answering per server address and recording every query.
#[derive(Debug, Default)]
pub struct MockDns {
    replies: HashMap<IpAddr, DnsReply>,
    calls: Mutex<Vec<SocketAddr>>,
}

impl MockDns {
    pub fn new<I>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (IpAddr, DnsReply)>,
    {
        Arc::new(Self {
            replies: replies.into_iter().collect(),
            calls: Mutex::default(),
        })
    }

    pub fn calls(&self) -> Vec<SocketAddr> {
        self.calls.lock().unwrap().clone()
    }
}

impl dns::Transport for MockDns {
    fn query(
        &self,
        server: SocketAddr,
        _query: Query,
        _timeout: Duration,
    ) -> BoxFuture<'static, Result<Vec<Record>, dns::Error>> {
        self.calls.lock().unwrap().push(server);
        let reply = self.replies.get(&server.ip()).cloned().unwrap_or(DnsReply::Fail);
        Box::pin(async move {
            match reply {
                DnsReply::Answer(rdata) => Ok(vec![Record::from_rdata(Name::root(), 60, rdata)]),
                DnsReply::Delayed(delay, rdata) => {
                    tokio::time::sleep(delay).await;
                    Ok(vec![Record::from_rdata(Name::root(), 60, rdata)])
                }
                DnsReply::Empty => Ok(Vec::new()),
                DnsReply::Fail => Err(ProtoErrorKind::Message("connection refused").into()),
                DnsReply::Hang => future::pending().await,
            }
        })
    }
}

#[derive(Debug, Clone)]
pub enum HttpReply {
    Body(u16, &'static str),
    Fail,
    Hang,
    Status(u16),
}

impl HttpReply {
    pub fn ok(body: &'static str) -> Self {
        Self::Body(200, body)
    }
}

/// HTTP transport answering per host and recording every request.
#[derive(Debug, Default)]
pub struct MockHttp {
    replies: HashMap<String, HttpReply>,
    calls: Mutex<Vec<String>>,
}

impl MockHttp {
    pub fn new<I>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (&'static str, HttpReply)>,
    {
        Arc::new(Self {
            replies: replies
                .into_iter()
                .map(|(host, reply)| (host.to_owned(), reply))
                .collect(),
            calls: Mutex::default(),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl http_resolver::Transport for MockHttp {
    fn get(
        &self,
        _version: Version,
        uri: Uri,
    ) -> BoxFuture<'static, Result<Response<Bytes>, http_resolver::Error>> {
        let host = uri.host().unwrap_or_default().to_owned();
        self.calls.lock().unwrap().push(host.clone());
        let reply = self.replies.get(&host).cloned().unwrap_or(HttpReply::Fail);
        Box::pin(async move {
            let (status, body) = match reply {
                HttpReply::Body(status, body) => (status, body),
                HttpReply::Status(status) => (status, ""),
                HttpReply::Fail => {
                    return Err(http_resolver::Error::Status(StatusCode::SERVICE_UNAVAILABLE));
                }
                HttpReply::Hang => future::pending().await,
            };
            Ok(Response::builder()
                .status(status)
                .body(Bytes::from_static(body.as_bytes()))
                .unwrap())
        })
    }
}

pub fn context(dns: &Arc<MockDns>, http: &Arc<MockHttp>, timeout: Duration) -> Context {
    Context::new(timeout)
        .with_dns_transport(dns.clone())
        .with_http_transport(http.clone())
}

/// Spawns a DNS server on a local UDP socket.
///
/// Every question is answered with an `A` record holding `answer`, or left
/// unanswered when `answer` is `None`.
pub async fn serve_dns(answer: Option<Ipv4Addr>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0; 4096];
        loop {
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let Some(answer) = answer else { continue };
            let request = Message::from_vec(&buf[..len]).unwrap();
            let mut response = Message::new();
            response
                .set_id(request.id())
                .set_message_type(MessageType::Response)
                .set_op_code(request.op_code())
                .set_recursion_desired(request.recursion_desired())
                .set_recursion_available(true)
                .add_queries(request.queries().to_vec());
            for query in request.queries() {
                response.add_answer(Record::from_rdata(
                    query.name().clone(),
                    60,
                    RData::A(A(answer)),
                ));
            }
            let bytes = response.to_vec().unwrap();
            socket.send_to(&bytes, peer).await.unwrap();
        }
    });
    addr
}

/// Spawns a plain HTTP/1 server on a local port answering every request with
/// `status` and `body`.
pub async fn serve_http(status: u16, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| async move {
                Ok::<_, Infallible>(
                    Response::builder()
                        .status(status)
                        .body(Full::new(Bytes::from_static(body.as_bytes())))
                        .unwrap(),
                )
            });
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}
