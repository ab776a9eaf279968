//! Line-JSON broadcast hub.
//!
//! Every connected TCP client receives each telemetry document as one
//! newline-terminated JSON line; every line a client sends is forwarded to
//! the engine's command queue. Clients that stop reading are pruned on the
//! next write. The hub never initiates traffic toward the engine beyond the
//! command queue, so a slow dashboard cannot stall the control loops.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use flowdose_core::telemetry::TelemetrySink;

/// Poll interval of the non-blocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(50);
/// A client that cannot take a line within this window is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct BroadcastHub {
    clients: Arc<Mutex<Vec<TcpStream>>>,
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl BroadcastHub {
    /// Bind and start accepting. Inbound lines go to `commands`.
    pub fn spawn(bind: &str, commands: Sender<String>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let clients: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_handle = {
            let clients = Arc::clone(&clients);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("broadcast-accept".into())
                .spawn(move || {
                    loop {
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        match listener.accept() {
                            Ok((stream, peer)) => {
                                tracing::info!(%peer, "broadcast client connected");
                                if let Err(e) = stream.set_write_timeout(Some(WRITE_TIMEOUT)) {
                                    tracing::warn!(error = %e, "client setup failed");
                                    continue;
                                }
                                match stream.try_clone() {
                                    Ok(reader) => {
                                        spawn_reader(reader, peer, commands.clone());
                                        if let Ok(mut list) = clients.lock() {
                                            list.push(stream);
                                        }
                                    }
                                    Err(e) => {
                                        tracing::warn!(error = %e, "client clone failed")
                                    }
                                }
                            }
                            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                                std::thread::sleep(ACCEPT_POLL);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "accept failed");
                                std::thread::sleep(ACCEPT_POLL);
                            }
                        }
                    }
                    tracing::debug!("broadcast accept loop exiting");
                })?
        };

        Ok(Self {
            clients,
            shutdown,
            accept_handle: Some(accept_handle),
            local_addr,
        })
    }

    /// Actual bound address (useful with a `:0` bind).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }
}

fn spawn_reader(stream: TcpStream, peer: SocketAddr, commands: Sender<String>) {
    let _ = std::thread::Builder::new()
        .name("broadcast-reader".into())
        .spawn(move || {
            let reader = BufReader::new(stream);
            for line in reader.lines() {
                let line = match line {
                    Ok(l) => l,
                    Err(_) => break,
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if commands.send(line.to_string()).is_err() {
                    break;
                }
            }
            tracing::info!(%peer, "broadcast client disconnected");
        });
}

impl TelemetrySink for BroadcastHub {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn publish(&mut self, payload: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut list = match self.clients.lock() {
            Ok(l) => l,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = list.len();
        list.retain_mut(|stream| writeln!(stream, "{payload}").is_ok());
        let dropped = before - list.len();
        if dropped > 0 {
            tracing::info!(dropped, "pruned unresponsive broadcast clients");
        }
        Ok(())
    }
}

impl Drop for BroadcastHub {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Unblock reader threads stuck in read().
        if let Ok(list) = self.clients.lock() {
            for stream in list.iter() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
    }
}
