//! Position fixes from a gpsd daemon over its JSON watch protocol.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};
use wardrive_core::ports::ADAPTER_POLL;
use wardrive_core::{
    now_unix_ms, Event, EventSender, Position, PositionSource, PriorityHint, Result,
    WardriveError,
};

const WATCH: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const LAST_KNOWN_WAIT: Duration = Duration::from_secs(2);

/// One time-position-velocity report.
#[derive(Debug, Clone, PartialEq)]
pub struct Tpv {
    /// gpsd fix mode: 0/1 no fix, 2 two-dimensional, 3 three-dimensional.
    pub mode: u8,
    pub position: Position,
}

impl Tpv {
    fn usable(&self, priority: PriorityHint) -> bool {
        match priority {
            PriorityHint::HighAccuracy => self.mode >= 3,
            PriorityHint::BalancedPower => self.mode >= 2,
        }
    }
}

#[derive(Default)]
struct Shared {
    latest: Mutex<Option<Tpv>>,
    seq: AtomicU64,
    stop: AtomicBool,
}

struct Ticker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct GpsdSource {
    addr: SocketAddr,
    connect_timeout: Duration,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    ticker: Option<Ticker>,
}

impl GpsdSource {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| WardriveError::Source {
                source_name: "gpsd",
                reason: format!("cannot resolve {host}:{port}"),
            })?;
        Ok(Self {
            addr,
            connect_timeout,
            shared: Arc::new(Shared::default()),
            reader: None,
            ticker: None,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn ensure_reader(&mut self) {
        if self.reader.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let addr = self.addr;
        let timeout = self.connect_timeout;
        self.reader = Some(thread::spawn(move || reader_loop(addr, timeout, shared)));
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop.store(true, Ordering::Relaxed);
            let _ = ticker.handle.join();
        }
    }
}

impl PositionSource for GpsdSource {
    fn name(&self) -> &'static str {
        "gpsd"
    }

    fn subscribe(
        &mut self,
        interval: Duration,
        priority: PriorityHint,
        events: EventSender,
    ) -> Result<()> {
        self.ensure_reader();
        self.stop_ticker();
        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let ticker_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || ticker_loop(interval, priority, shared, ticker_stop, events));
        self.ticker = Some(Ticker { stop, handle });
        info!(addr = %self.addr, interval_ms = interval.as_millis() as u64, "subscribed to gpsd");
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.stop_ticker();
    }

    fn request_last_known(&mut self, events: EventSender) {
        self.ensure_reader();
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            let deadline = Instant::now() + LAST_KNOWN_WAIT;
            let mut latest = shared.latest.lock().clone();
            while latest.is_none() && Instant::now() < deadline {
                thread::sleep(ADAPTER_POLL);
                latest = shared.latest.lock().clone();
            }
            let _ = events.send(Event::LastKnown(latest.map(|t| t.position)));
        });
    }
}

impl Drop for GpsdSource {
    fn drop(&mut self) {
        self.stop_ticker();
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

/// Open a TCP connection to gpsd with a bounded connect time.
pub(crate) fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect_timeout(&addr.into(), timeout)?;
    socket.set_read_timeout(Some(ADAPTER_POLL))?;
    Ok(socket.into())
}

fn reader_loop(addr: SocketAddr, timeout: Duration, shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::Relaxed) {
        match watch(addr, timeout, &shared) {
            Ok(()) => debug!(%addr, "gpsd closed the connection"),
            Err(e) => warn!(%addr, "gpsd connection failed: {e}"),
        }
        sleep_unless_stopped(RECONNECT_DELAY, &shared.stop);
    }
}

fn watch(addr: SocketAddr, timeout: Duration, shared: &Shared) -> io::Result<()> {
    let mut stream = connect(addr, timeout)?;
    stream.write_all(WATCH)?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    while !shared.stop.load(Ordering::Relaxed) {
        match reader.read_line(&mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {
                if let Some(tpv) = parse_tpv(&line) {
                    *shared.latest.lock() = Some(tpv);
                    shared.seq.fetch_add(1, Ordering::Relaxed);
                }
                line.clear();
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn ticker_loop(
    interval: Duration,
    priority: PriorityHint,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    events: EventSender,
) {
    let mut emitted_seq = 0;
    loop {
        sleep_unless_stopped(interval, &stop);
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let seq = shared.seq.load(Ordering::Relaxed);
        if seq == emitted_seq {
            continue;
        }
        let latest = shared.latest.lock().clone();
        match latest {
            Some(tpv) if tpv.usable(priority) => {
                emitted_seq = seq;
                if events.send(Event::PositionFix(tpv.position)).is_err() {
                    break;
                }
            }
            Some(tpv) => debug!(mode = tpv.mode, "fix below requested accuracy"),
            None => {}
        }
    }
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(ADAPTER_POLL));
    }
}

/// Parse one gpsd JSON line; anything but a TPV with coordinates is `None`.
pub fn parse_tpv(line: &str) -> Option<Tpv> {
    let v: Value = serde_json::from_str(line.trim()).ok()?;
    if v.get("class")?.as_str()? != "TPV" {
        return None;
    }
    let num = |key: &str| v.get(key).and_then(Value::as_f64);
    let lat = num("lat")?;
    let lon = num("lon")?;
    let mode = v.get("mode").and_then(Value::as_u64).unwrap_or(0).min(3) as u8;
    let accuracy = num("eph")
        .or_else(|| match (num("epx"), num("epy")) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        })
        .unwrap_or(0.0);

    let mut position = Position::new(lat, lon, accuracy).at(now_unix_ms());
    if let Some(alt) = num("altMSL").or_else(|| num("alt")).or_else(|| num("altHAE")) {
        position = position.with_altitude(alt);
    }
    if let Some(speed) = num("speed") {
        position = position.with_speed(speed);
    }
    Some(Tpv { mode, position })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use wardrive_core::event;

    const TPV_3D: &str = r#"{"class":"TPV","device":"/dev/ttyUSB0","mode":3,"lat":47.3769,"lon":8.5417,"altMSL":408.2,"speed":1.5,"epx":4.1,"epy":6.3}"#;

    #[test]
    fn tpv_fields_map_onto_position() {
        let tpv = parse_tpv(TPV_3D).unwrap();
        assert_eq!(tpv.mode, 3);
        assert!((tpv.position.lat - 47.3769).abs() < 1e-9);
        assert!((tpv.position.accuracy_m - 6.3).abs() < 1e-9);
        assert_eq!(tpv.position.altitude_m, Some(408.2));
        assert_eq!(tpv.position.speed_mps, Some(1.5));
    }

    #[test]
    fn eph_takes_precedence() {
        let tpv = parse_tpv(r#"{"class":"TPV","mode":2,"lat":1.0,"lon":2.0,"eph":3.5,"epx":9.0}"#).unwrap();
        assert!((tpv.position.accuracy_m - 3.5).abs() < 1e-9);
        assert_eq!(tpv.position.altitude_m, None);
    }

    #[test]
    fn non_tpv_and_fixless_reports_are_skipped() {
        assert!(parse_tpv(r#"{"class":"SKY","satellites":[]}"#).is_none());
        assert!(parse_tpv(r#"{"class":"TPV","mode":1}"#).is_none());
        assert!(parse_tpv("garbage").is_none());
    }

    #[test]
    fn priority_gates_fix_mode() {
        let mut tpv = parse_tpv(TPV_3D).unwrap();
        assert!(tpv.usable(PriorityHint::HighAccuracy));
        tpv.mode = 2;
        assert!(!tpv.usable(PriorityHint::HighAccuracy));
        assert!(tpv.usable(PriorityHint::BalancedPower));
    }

    #[test]
    fn streams_fixes_from_a_daemon() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut watch = String::new();
            BufReader::new(conn.try_clone().unwrap()).read_line(&mut watch).unwrap();
            assert!(watch.starts_with("?WATCH="));
            for _ in 0..20 {
                if writeln!(conn, "{TPV_3D}").is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
        });

        let mut source = GpsdSource::new("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        let (tx, rx) = event::channel();
        source
            .subscribe(Duration::from_millis(100), PriorityHint::HighAccuracy, tx.clone())
            .unwrap();
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::PositionFix(p) => assert!((p.lon - 8.5417).abs() < 1e-9),
            other => panic!("unexpected event {other:?}"),
        }
        source.unsubscribe();
        while rx.try_recv().is_ok() {}

        source.request_last_known(tx);
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::LastKnown(Some(p)) => assert!((p.lat - 47.3769).abs() < 1e-9),
            other => panic!("unexpected event {other:?}"),
        }
        drop(source);
        server.join().unwrap();
    }
}
