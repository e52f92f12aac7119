//! Shared helpers for integration tests.
//!
//! Builds an appliance rooted in a temporary state directory whose worker
//! executable is the `golden-sd` binary under test, plus a loopback HTTP
//! responder standing in for image mirrors.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use golden_sd::arm::ManualClock;
use golden_sd::{Appliance, Config, OsCatalog, RpcHandler, RpcRequest, RpcResponse, TargetProvider};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

/// Path of the binary Cargo built for this test run.
pub fn worker_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_golden-sd"))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// An appliance in a temp state dir with a controllable clock.
pub struct TestAppliance {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub handler: RpcHandler,
}

impl TestAppliance {
    pub fn new(catalog: impl OsCatalog + 'static, targets: impl TargetProvider + 'static) -> Self {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let appliance = Appliance::assemble(
            Config::for_state_dir(dir.path()),
            worker_exe(),
            Box::new(catalog),
            Box::new(targets),
            clock.clone(),
        );
        Self {
            dir,
            clock,
            handler: RpcHandler::new(appliance),
        }
    }

    pub fn state_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn appliance(&self) -> &Appliance {
        self.handler.appliance()
    }

    pub fn call(&self, op: &str, payload: Value) -> RpcResponse {
        self.handler.handle_request(&RpcRequest::new(op, format!("it-{}", op), payload))
    }

    /// Call and unwrap a successful payload.
    pub fn ok(&self, op: &str, payload: Value) -> Value {
        match self.call(op, payload).into_result() {
            Ok(payload) => payload,
            Err(e) => panic!("{} failed: {}", op, e),
        }
    }

    /// Plan a flash and return its plan id.
    pub fn plan(&self, target: &str, os_id: &str) -> String {
        let plan = self.ok("plan_flash", serde_json::json!({ "target": target, "os_id": os_id }));
        plan["plan_id"].as_str().unwrap().to_string()
    }

    /// Poll `status` until the job reports `done`.
    pub fn wait_done(&self, job_id: &str) -> Value {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            let status = self.ok("status", serde_json::json!({ "job_id": job_id }));
            if status["done"] == true {
                return status;
            }
            assert!(Instant::now() < deadline, "job {} did not finish: {}", job_id, status);
            thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn tail(&self, job_id: &str) -> Vec<String> {
        let payload = self.ok("tail", serde_json::json!({ "job_id": job_id, "max_lines": 500 }));
        serde_json::from_value(payload["lines"].clone()).unwrap()
    }
}

/// A loopback HTTP server answering every request with `status` and `body`.
pub struct Mirror {
    pub url: String,
    hits: Arc<AtomicUsize>,
}

impl Mirror {
    pub fn serve(status: u16, body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/image.img", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let Ok(read_half) = stream.try_clone() else { continue };
                let mut reader = BufReader::new(read_half);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line) {
                        Ok(0) | Err(_) => break,
                        Ok(_) if line == "\r\n" => break,
                        Ok(_) => {}
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let head = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
                let _ = stream.flush();
            }
        });
        Self { url, hits }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}
