//! Simulated collaborators for hosts without gpsd or a wireless card.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wardrive_core::ports::ADAPTER_POLL;
use wardrive_core::{
    now_unix_ms, Event, EventSender, NetworkSighting, Position, PositionSource, PriorityHint,
    Result, ScanSource,
};

const METERS_PER_DEG_LAT: f64 = 111_320.0;
const SCAN_LATENCY: Duration = Duration::from_millis(50);
const CHANNELS_MHZ: [u32; 6] = [2412, 2437, 2462, 5180, 5240, 5745];

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

struct Walker {
    lat: f64,
    lon: f64,
    step_m: f64,
    rng: StdRng,
}

impl Walker {
    fn step(&mut self, priority: PriorityHint) -> Position {
        let bearing = self.rng.gen_range(0.0..std::f64::consts::TAU);
        let dist = self.step_m * self.rng.gen_range(0.5..1.5);
        self.lat = (self.lat + dist * bearing.cos() / METERS_PER_DEG_LAT).clamp(-89.9, 89.9);
        let lon_scale = METERS_PER_DEG_LAT * self.lat.to_radians().cos();
        self.lon += dist * bearing.sin() / lon_scale;
        if self.lon > 180.0 {
            self.lon -= 360.0;
        } else if self.lon < -180.0 {
            self.lon += 360.0;
        }
        let accuracy = match priority {
            PriorityHint::HighAccuracy => self.rng.gen_range(3.0..10.0),
            PriorityHint::BalancedPower => self.rng.gen_range(20.0..60.0),
        };
        Position::new(self.lat, self.lon, accuracy)
            .with_altitude(self.rng.gen_range(400.0..420.0))
            .with_speed(dist / 30.0)
            .at(now_unix_ms())
    }

    fn here(&self) -> Position {
        Position::new(self.lat, self.lon, 0.0).at(now_unix_ms())
    }
}

struct Ticker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Random walk around a starting point, one step per interval.
pub struct SimulatedPosition {
    walker: Arc<Mutex<Walker>>,
    ticker: Option<Ticker>,
}

impl SimulatedPosition {
    pub fn new(start_lat: f64, start_lon: f64, step_m: f64, seed: Option<u64>) -> Self {
        Self {
            walker: Arc::new(Mutex::new(Walker {
                lat: start_lat,
                lon: start_lon,
                step_m,
                rng: rng_from(seed),
            })),
            ticker: None,
        }
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop.store(true, Ordering::Relaxed);
            let _ = ticker.handle.join();
        }
    }
}

impl PositionSource for SimulatedPosition {
    fn name(&self) -> &'static str {
        "simulated position"
    }

    fn subscribe(
        &mut self,
        interval: Duration,
        priority: PriorityHint,
        events: EventSender,
    ) -> Result<()> {
        self.stop_ticker();
        let stop = Arc::new(AtomicBool::new(false));
        let walker = Arc::clone(&self.walker);
        let ticker_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || loop {
            let deadline = Instant::now() + interval;
            while !ticker_stop.load(Ordering::Relaxed) && Instant::now() < deadline {
                thread::sleep(deadline.saturating_duration_since(Instant::now()).min(ADAPTER_POLL));
            }
            if ticker_stop.load(Ordering::Relaxed) {
                break;
            }
            let fix = walker.lock().step(priority);
            if events.send(Event::PositionFix(fix)).is_err() {
                break;
            }
        });
        self.ticker = Some(Ticker { stop, handle });
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.stop_ticker();
    }

    fn request_last_known(&mut self, events: EventSender) {
        let _ = events.send(Event::LastKnown(Some(self.walker.lock().here())));
    }
}

impl Drop for SimulatedPosition {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

/// A fixed population of networks whose levels jitter from scan to scan.
pub struct SimulatedScanner {
    population: Arc<Mutex<(Vec<NetworkSighting>, StdRng)>>,
    results: Arc<Mutex<Vec<NetworkSighting>>>,
}

impl SimulatedScanner {
    pub fn new(networks: usize, seed: Option<u64>) -> Self {
        let mut rng = rng_from(seed);
        let population = (0..networks)
            .map(|i| {
                let mac: Vec<String> = std::iter::once(0x02u8)
                    .chain((0..5).map(|_| rng.gen::<u8>()))
                    .map(|b| format!("{b:02x}"))
                    .collect();
                let freq = CHANNELS_MHZ[rng.gen_range(0..CHANNELS_MHZ.len())];
                NetworkSighting::new(format!("sim-net-{i}"), mac.join(":"), freq, rng.gen_range(-90..-40))
            })
            .collect();
        Self {
            population: Arc::new(Mutex::new((population, rng))),
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ScanSource for SimulatedScanner {
    fn name(&self) -> &'static str {
        "simulated scanner"
    }

    fn request_scan(&mut self, events: EventSender) {
        let population = Arc::clone(&self.population);
        let results = Arc::clone(&self.results);
        thread::spawn(move || {
            thread::sleep(SCAN_LATENCY);
            let batch = {
                let mut guard = population.lock();
                let (networks, rng) = &mut *guard;
                networks
                    .iter()
                    .map(|n| {
                        let mut seen = n.clone();
                        seen.level_dbm = (n.level_dbm + rng.gen_range(-5..=5)).clamp(-100, -20);
                        seen
                    })
                    .collect()
            };
            *results.lock() = batch;
            let _ = events.send(Event::ScanComplete);
        });
    }

    fn scan_results(&self) -> Vec<NetworkSighting> {
        self.results.lock().clone()
    }
}
