//! Integration tests running probes against a TWAMP responder on loopback.
//!
//! The responder speaks just enough unauthenticated TWAMP-Control to accept one
//! session and reflects test packets from a UDP socket on 127.0.0.1.

use std::{
    io,
    net::IpAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    task::JoinHandle,
};
use tower::ServiceExt;

use twamp_exporter::{
    configuration::{IpProtocol, Modules, PortRange, ProbeConfiguration},
    packets::{ReflectedTestPacket, TestPacket},
    prober::Prober,
    resolver::{IpVersion, NameLookup, TargetResolver},
    server::{router, AppState},
    time::ntp_now,
    twamp::{
        control::{
            AcceptSession, RequestTwSession, ServerGreeting, ServerStart, StartAck,
            StartSessions, StopSessions, MODE_UNAUTHENTICATED, REQUEST_SESSION_SIZE,
            SETUP_RESPONSE_SIZE, START_SESSIONS_SIZE, STOP_SESSIONS_SIZE,
        },
        TwampClient,
    },
};

struct NoLookup;

#[async_trait]
impl NameLookup for NoLookup {
    async fn lookup(&self, host: &str, _family: Option<IpVersion>) -> io::Result<Vec<IpAddr>> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found", host),
        ))
    }
}

#[derive(Clone, Copy, Default)]
struct Behavior {
    /// Accept code answered to Request-TW-Session.
    session_accept: u8,
    /// Reflect only even sequence numbers.
    drop_odd: bool,
}

/// What the responder observed on its control connection.
#[derive(Debug)]
struct Report {
    request: RequestTwSession,
    started: bool,
    stopped: bool,
    reflected: u32,
}

/// Find an available UDP port for the session sender.
async fn find_available_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.local_addr().unwrap().port()
}

async fn reflect(socket: UdpSocket, padding: usize, drop_odd: bool, reflected: Arc<AtomicU32>) {
    let mut buf = vec![0u8; 65536];
    let mut sequence_number = 0;
    loop {
        let Ok((len, src)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let receive_timestamp = ntp_now();
        let Ok(packet) = TestPacket::from_bytes(&buf[..len]) else {
            continue;
        };
        if drop_odd && packet.sequence_number % 2 == 1 {
            continue;
        }
        let answer =
            ReflectedTestPacket::answer(&packet, sequence_number, receive_timestamp, ntp_now(), 255);
        sequence_number += 1;
        if socket.send_to(&answer.to_bytes(padding), src).await.is_ok() {
            reflected.fetch_add(1, Ordering::SeqCst);
        }
    }
}

async fn serve_control(
    mut stream: TcpStream,
    reflector: UdpSocket,
    behavior: Behavior,
) -> Report {
    let greeting = ServerGreeting {
        modes: MODE_UNAUTHENTICATED,
        challenge: [0; 16],
        salt: [0; 16],
        count: 1024,
    };
    stream.write_all(&greeting.to_bytes()).await.unwrap();

    let mut setup = [0u8; SETUP_RESPONSE_SIZE];
    stream.read_exact(&mut setup).await.unwrap();
    let start = ServerStart {
        accept: 0,
        start_time: ntp_now(),
    };
    stream.write_all(&start.to_bytes()).await.unwrap();

    let mut request = [0u8; REQUEST_SESSION_SIZE];
    stream.read_exact(&mut request).await.unwrap();
    let request = RequestTwSession::from_bytes(&request).unwrap();
    let accept = AcceptSession {
        accept: behavior.session_accept,
        port: reflector.local_addr().unwrap().port(),
        sid: [0x5A; 16],
    };
    stream.write_all(&accept.to_bytes()).await.unwrap();

    let mut report = Report {
        request,
        started: false,
        stopped: false,
        reflected: 0,
    };

    let mut command = [0u8; START_SESSIONS_SIZE];
    if behavior.session_accept != 0 || stream.read_exact(&mut command).await.is_err() {
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
        assert!(rest.is_empty(), "unexpected control traffic after rejection");
        return report;
    }
    StartSessions::from_bytes(&command).unwrap();
    report.started = true;

    let reflected = Arc::new(AtomicU32::new(0));
    let reflector_task = tokio::spawn(reflect(
        reflector,
        request.padding_length as usize,
        behavior.drop_odd,
        reflected.clone(),
    ));
    stream
        .write_all(&StartAck { accept: 0 }.to_bytes())
        .await
        .unwrap();

    let mut stop = [0u8; STOP_SESSIONS_SIZE];
    if stream.read_exact(&mut stop).await.is_ok() {
        report.stopped = StopSessions::from_bytes(&stop).is_ok();
    }
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest).await;

    reflector_task.abort();
    report.reflected = reflected.load(Ordering::SeqCst);
    report
}

/// Starts a responder accepting a single control connection.
async fn spawn_responder(behavior: Behavior) -> (u16, JoinHandle<Report>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let reflector = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve_control(stream, reflector, behavior).await
    });
    (port, handle)
}

fn prober() -> Prober {
    Prober::new(
        TargetResolver::new(Arc::new(NoLookup)),
        Arc::new(TwampClient::new()),
    )
}

async fn profile(control_port: u16, count: i64) -> ProbeConfiguration {
    let sender_port = find_available_port().await as i32;
    ProbeConfiguration {
        control_port: control_port as i32,
        sender_port_range: PortRange::new(sender_port, sender_port),
        receiver_port_range: PortRange::new(19000, 20000),
        count,
        timeout: 1,
        ip: IpProtocol {
            version: 4,
            fallback: false,
        },
    }
}

#[tokio::test]
async fn test_probe_over_loopback() {
    let (port, responder) = spawn_responder(Behavior::default()).await;
    let conf = profile(port, 5).await;

    let stats = prober().run(&conf, "127.0.0.1").await;
    let report = responder.await.unwrap();

    assert!(stats.success);
    assert_eq!(stats.packets_sent, 5);
    assert_eq!(stats.packets_received, 5);
    assert!(stats.forward.min <= stats.forward.avg);
    assert!(stats.forward.avg <= stats.forward.max);
    assert!(stats.round_trip.min > 0.0);
    assert!(stats.round_trip.max < 1.0);

    assert_eq!(report.request.ip_version, 4);
    assert_eq!(report.request.padding_length, 5);
    assert_eq!(
        report.request.sender_port as i32,
        conf.sender_port_range.from
    );
    assert!((19000..=20000).contains(&report.request.receiver_port));
    assert!(report.started);
    assert!(report.stopped);
    assert_eq!(report.reflected, 5);
}

#[tokio::test]
async fn test_lost_replies_count_as_sent() {
    let behavior = Behavior {
        drop_odd: true,
        ..Behavior::default()
    };
    let (port, responder) = spawn_responder(behavior).await;
    let conf = profile(port, 4).await;

    let stats = prober().run(&conf, "127.0.0.1").await;
    let report = responder.await.unwrap();

    assert!(stats.success);
    assert_eq!(stats.packets_sent, 4);
    assert_eq!(stats.packets_received, 2);
    assert_eq!(report.reflected, 2);
    assert!(report.stopped);
}

#[tokio::test]
async fn test_rejected_session() {
    let behavior = Behavior {
        session_accept: 5,
        ..Behavior::default()
    };
    let (port, responder) = spawn_responder(behavior).await;
    let conf = profile(port, 3).await;

    let stats = prober().run(&conf, "127.0.0.1").await;
    let report = responder.await.unwrap();

    assert!(!stats.success);
    assert_eq!(stats.packets_sent, 0);
    assert!(!report.started);
    assert!(!report.stopped);
}

#[tokio::test]
async fn test_unreachable_target() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let conf = profile(port, 3).await;

    let started = Instant::now();
    let stats = prober().run(&conf, "127.0.0.1").await;

    assert!(!stats.success);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_probe_endpoint_over_loopback() {
    let (port, responder) = spawn_responder(Behavior::default()).await;
    let mut modules = Modules::new();
    modules.insert("loopback".to_string(), profile(port, 3).await);

    let app = router(AppState {
        modules: Arc::new(modules),
        prober: prober(),
        metrics: None,
    });
    let response = app
        .oneshot(
            Request::builder()
                .uri("/probe?module=loopback&target=127.0.0.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.lines().any(|l| l == "probe_success 1"), "{}", body);
    assert!(body.lines().any(|l| l == "probe_packets_received 3"), "{}", body);

    let report = responder.await.unwrap();
    assert_eq!(report.reflected, 3);
}
