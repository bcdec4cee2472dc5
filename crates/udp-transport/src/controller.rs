use crate::socket::{bind_receive, bind_send};
use crate::{CommConfig, Datagram, LocalAddrs, Phase, Result, TransportError};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Callback for transport errors and lifecycle messages.
pub type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// A hook call collected under the session lock and delivered after it is released.
enum Notice {
    Status(String),
    Error(String),
}

#[derive(Default)]
struct Hooks {
    error: RwLock<Option<Hook>>,
    status: RwLock<Option<Hook>>,
}

impl Hooks {
    fn error(&self, message: &str) {
        let hook = self
            .error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match hook {
            Some(hook) => hook(message),
            None => warn!(target: "udp_transport", "{message}"),
        }
    }

    fn status(&self, message: &str) {
        let hook = self
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match hook {
            Some(hook) => hook(message),
            None => info!(target: "udp_transport", "{message}"),
        }
    }

    fn emit(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::Status(message) => self.status(&message),
                Notice::Error(message) => self.error(&message),
            }
        }
    }
}

struct Sockets {
    send: Arc<UdpSocket>,
    receive: Arc<UdpSocket>,
    addrs: LocalAddrs,
}

struct Session {
    config: CommConfig,
    phase: Phase,
    sockets: Option<Sockets>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

/// What the query methods report, republished after every session change.
#[derive(Clone)]
struct View {
    config: CommConfig,
    phase: Phase,
    addrs: Option<LocalAddrs>,
}

#[derive(Clone)]
struct SendSlot {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

/// Owns the UDP socket pair and the receive thread of one session.
///
/// Received datagrams are queued on a bounded channel obtained from
/// [`receiver`](Self::receiver); when the queue is full new datagrams are dropped
/// and counted. `setup`, `start_receive_loop`, `stop` and `update_config` are
/// serialized by one session lock. `send` only touches a separate slot and never
/// waits for the receive thread. Hooks run after the session lock is released,
/// so they may call back into the controller.
pub struct CommunicationController {
    session: Mutex<Session>,
    view: Mutex<View>,
    send_slot: Mutex<Option<SendSlot>>,
    stop_epoch: AtomicU64,
    hooks: Arc<Hooks>,
    tx: Sender<Datagram>,
    rx: Receiver<Datagram>,
    dropped: Arc<AtomicU64>,
}

impl CommunicationController {
    pub fn new(config: CommConfig) -> Self {
        let (tx, rx) = channel::bounded(config.queue_capacity.max(1));
        Self {
            view: Mutex::new(View {
                config: config.clone(),
                phase: Phase::Idle,
                addrs: None,
            }),
            session: Mutex::new(Session {
                config,
                phase: Phase::Idle,
                sockets: None,
                running: Arc::new(AtomicBool::new(false)),
                worker: None,
            }),
            send_slot: Mutex::new(None),
            stop_epoch: AtomicU64::new(0),
            hooks: Arc::new(Hooks::default()),
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_view(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the session lock, then deliver the hook calls it queued.
    fn with_session<T>(&self, f: impl FnOnce(&mut Session, &mut Vec<Notice>) -> T) -> T {
        let mut notices = Vec::new();
        let out = {
            let mut session = self.lock_session();
            let out = f(&mut session, &mut notices);
            *self.lock_view() = View {
                config: session.config.clone(),
                phase: session.phase,
                addrs: session.sockets.as_ref().map(|s| s.addrs),
            };
            out
        };
        self.hooks.emit(notices);
        out
    }

    fn lock_send_slot(&self) -> MutexGuard<'_, Option<SendSlot>> {
        self.send_slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_error_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.hooks.error.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn set_status_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.hooks.status.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Consumer side of the inbound queue. Capacity is fixed at construction.
    pub fn receiver(&self) -> Receiver<Datagram> {
        self.rx.clone()
    }

    pub fn dropped_datagrams(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> CommConfig {
        self.lock_view().config.clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock_view().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    pub fn local_addrs(&self) -> Option<LocalAddrs> {
        self.lock_view().addrs
    }

    /// Bind a fresh socket pair, releasing any previous pair first.
    ///
    /// A `stop` that has not returned before this call starts wins: the new
    /// sockets are closed again and [`TransportError::SetupCancelled`] is returned.
    pub fn setup(&self) -> Result<LocalAddrs> {
        let epoch = self.stop_epoch.load(Ordering::SeqCst);
        self.with_session(|session, notices| self.setup_locked(session, epoch, notices))
    }

    fn setup_locked(
        &self,
        session: &mut Session,
        epoch: u64,
        notices: &mut Vec<Notice>,
    ) -> Result<LocalAddrs> {
        self.teardown(session, notices);
        let result = self.bind_pair(&session.config, epoch);
        match result {
            Ok(sockets) => {
                let addrs = sockets.addrs;
                *self.lock_send_slot() = Some(SendSlot {
                    socket: Arc::clone(&sockets.send),
                    target: session.config.target_addr(),
                });
                session.sockets = Some(sockets);
                session.phase = Phase::Ready;
                info!(send = %addrs.send, receive = %addrs.receive, "udp sockets bound");
                notices.push(Notice::Status(format!(
                    "ready: send {} receive {} target {}",
                    addrs.send,
                    addrs.receive,
                    session.config.target_addr()
                )));
                Ok(addrs)
            }
            Err(TransportError::SetupCancelled) => {
                notices.push(Notice::Status("setup cancelled by stop".into()));
                Err(TransportError::SetupCancelled)
            }
            Err(e) => {
                notices.push(Notice::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn bind_pair(&self, config: &CommConfig, epoch: u64) -> Result<Sockets> {
        let send = bind_send(config.send_addr())?;
        let receive = bind_receive(config.receive_addr(), config.receive_timeout())?;
        if self.stop_epoch.load(Ordering::SeqCst) != epoch {
            return Err(TransportError::SetupCancelled);
        }
        let addrs = LocalAddrs {
            send: send.local_addr().map_err(|e| TransportError::Io(e.to_string()))?,
            receive: receive
                .local_addr()
                .map_err(|e| TransportError::Io(e.to_string()))?,
        };
        Ok(Sockets {
            send: Arc::new(send),
            receive: Arc::new(receive),
            addrs,
        })
    }

    /// Spawn the receive thread. A no-op when it is already running.
    pub fn start_receive_loop(&self) -> Result<()> {
        self.with_session(|session, notices| self.start_locked(session, notices))
    }

    fn start_locked(&self, session: &mut Session, notices: &mut Vec<Notice>) -> Result<()> {
        match session.phase {
            Phase::Running => return Ok(()),
            Phase::Idle => return Err(TransportError::NotReady),
            Phase::Ready => {}
        }
        let Some(sockets) = &session.sockets else {
            return Err(TransportError::NotReady);
        };
        let running = Arc::new(AtomicBool::new(true));
        let worker = ReceiveWorker {
            socket: Arc::clone(&sockets.receive),
            running: Arc::clone(&running),
            tx: self.tx.clone(),
            hooks: Arc::clone(&self.hooks),
            dropped: Arc::clone(&self.dropped),
            max_datagram: session.config.max_datagram.max(1),
        };
        let handle = thread::Builder::new()
            .name("acu-udp-recv".into())
            .spawn(move || worker.run())
            .map_err(|e| TransportError::Spawn(e.to_string()))?;
        session.running = running;
        session.worker = Some(handle);
        session.phase = Phase::Running;
        info!("receive loop started");
        notices.push(Notice::Status("receive loop started".into()));
        Ok(())
    }

    /// Transmit one datagram to the configured target.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        let slot = self.lock_send_slot().clone();
        let Some(slot) = slot else {
            return Err(TransportError::NotReady);
        };
        match slot.socket.send_to(data, slot.target) {
            Ok(n) => {
                debug!(bytes = n, target = %slot.target, "datagram sent");
                Ok(n)
            }
            Err(e) => {
                let err = TransportError::Io(format!("send to {}: {e}", slot.target));
                self.hooks.error(&err.to_string());
                Err(err)
            }
        }
    }

    /// Close both sockets and join the receive thread. Safe to call at any time
    /// and from any thread, including concurrently with `setup`.
    ///
    /// The stop epoch moves once on entry and once more before the session lock
    /// is released, so a `setup` that read it anywhere in between still fails
    /// its post-bind check.
    pub fn stop(&self) {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        self.with_session(|session, notices| {
            self.teardown(session, notices);
            self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        });
    }

    /// Replace the configuration. A live session is rebuilt on the new
    /// addresses and resumes the phase it was in.
    pub fn update_config(&self, config: CommConfig) -> Result<()> {
        let epoch = self.stop_epoch.load(Ordering::SeqCst);
        self.with_session(|session, notices| {
            let previous = session.phase;
            session.config = config;
            match previous {
                Phase::Idle => Ok(()),
                Phase::Ready => self.setup_locked(session, epoch, notices).map(|_| ()),
                Phase::Running => {
                    self.setup_locked(session, epoch, notices)?;
                    self.start_locked(session, notices)
                }
            }
        })
    }

    fn teardown(&self, session: &mut Session, notices: &mut Vec<Notice>) {
        *self.lock_send_slot() = None;
        session.running.store(false, Ordering::SeqCst);
        if let Some(handle) = session.worker.take() {
            if handle.thread().id() == thread::current().id() {
                warn!("stop requested from the receive thread; not joining itself");
            } else if handle.join().is_err() {
                warn!("receive thread panicked");
            }
        }
        let was = std::mem::replace(&mut session.phase, Phase::Idle);
        if session.sockets.take().is_some() || was != Phase::Idle {
            info!("udp sockets closed");
            notices.push(Notice::Status("stopped".into()));
        }
    }
}

impl Drop for CommunicationController {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ReceiveWorker {
    socket: Arc<UdpSocket>,
    running: Arc<AtomicBool>,
    tx: Sender<Datagram>,
    hooks: Arc<Hooks>,
    dropped: Arc<AtomicU64>,
    max_datagram: usize,
}

impl ReceiveWorker {
    fn run(self) {
        let mut buf = vec![0u8; self.max_datagram];
        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => self.deliver(Datagram {
                    data: buf[..n].to_vec(),
                    from,
                    received_at: OffsetDateTime::now_utc(),
                }),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        self.hooks.error(&format!("receive failed: {e}"));
                    }
                }
            }
        }
        debug!("receive loop exited");
    }

    fn deliver(&self, datagram: Datagram) {
        let from = datagram.from;
        let len = datagram.data.len();
        match self.tx.try_send(datagram) {
            Ok(()) => debug!(%from, len, "datagram queued"),
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                self.hooks.error(&format!(
                    "receive queue full, dropped {len}-byte datagram from {from} ({total} dropped)"
                ));
            }
            Err(TrySendError::Disconnected(_)) => {
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }
}
