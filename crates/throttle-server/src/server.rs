use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use mio::net::{TcpListener, UnixListener};
use mio::{Events, Poll, Token, Waker};
use throttle_store::{ConnectionAccumulators, ConnectionRecord, OpcodeCounters, Peer, State, TransportKind};
use throttle_timing::Nanos;
use throttle_utils::{ThreadPriority, boot_worker, resolve_worker_count};
use tracing::{debug, info, warn};

use crate::connection::{ConnState, Connection, Socket};
use crate::dispatch::dispatch;

const WAKE_TOKEN: Token = Token(usize::MAX);
const LISTENER_TOKEN: Token = Token(usize::MAX - 1);
const IDLE_POLL: StdDuration = StdDuration::from_millis(250);

/// The one transport a running instance exposes, chosen at startup.
pub enum Transport {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    fn bind(transport: &Transport) -> io::Result<Self> {
        match transport {
            Transport::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(*addr)?)),
            Transport::Unix(path) => {
                let _ = std::fs::remove_file(path);
                Ok(Listener::Unix(UnixListener::bind(path)?))
            }
        }
    }

    fn register(&mut self, registry: &mio::Registry) -> io::Result<()> {
        match self {
            Listener::Tcp(l) => registry.register(l, LISTENER_TOKEN, mio::Interest::READABLE),
            Listener::Unix(l) => registry.register(l, LISTENER_TOKEN, mio::Interest::READABLE),
        }
    }

    fn accept(&self) -> io::Result<(Socket, Option<SocketAddr>)> {
        match self {
            Listener::Tcp(l) => {
                let (stream, addr) = l.accept()?;
                Ok((Socket::Tcp(stream), Some(addr)))
            }
            Listener::Unix(l) => {
                let (stream, _) = l.accept()?;
                Ok((Socket::Unix(stream), None))
            }
        }
    }
}

pub struct ServerConfig {
    pub transport: Transport,
    pub threads: Option<usize>,
}

/// Hands a payload back to whichever worker owns the target connection's
/// token, then wakes that worker's poll loop. This is how
/// `throttle_store::Peer::enqueue` crosses OS-thread boundaries — the one
/// place this design goes beyond a single reactor thread.
struct PeerHandle {
    sender: Sender<WorkerMsg>,
    waker: Arc<Waker>,
    token: Token,
}

impl Peer for PeerHandle {
    fn enqueue(&self, payload: Arc<Vec<u8>>) {
        if self.sender.send(WorkerMsg::Deliver { token: self.token, payload }).is_ok() {
            let _ = self.waker.wake();
        }
    }
}

enum WorkerMsg {
    Accepted { socket: Socket, peer_addr: Option<SocketAddr> },
    Deliver { token: Token, payload: Arc<Vec<u8>> },
}

/// A fixed pool of worker threads, each owning an independent `mio::Poll`.
/// Worker 0 additionally owns the listener and the expiration sweep tick.
/// Every worker round-robins newly accepted connections (including to
/// itself) and drains its own inbox of cross-thread publish deliveries.
pub struct Server {
    shutdown: Arc<AtomicBool>,
    wakers: Vec<Arc<Waker>>,
    handles: Vec<JoinHandle<()>>,
}

impl Server {
    pub fn start(state: Arc<State>, config: ServerConfig) -> io::Result<Server> {
        let listener = Listener::bind(&config.transport)?;
        let threads = resolve_worker_count(config.threads);

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut senders = Vec::with_capacity(threads);
        let mut receivers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let (tx, rx) = mpsc::channel();
            senders.push(tx);
            receivers.push(rx);
        }

        let mut polls: Vec<Poll> = (0..threads).map(|_| Poll::new()).collect::<io::Result<_>>()?;
        let wakers: Vec<Arc<Waker>> =
            polls.iter().map(|p| Waker::new(p.registry(), WAKE_TOKEN).map(Arc::new)).collect::<io::Result<_>>()?;

        let mut listener = Some(listener);
        let mut handles = Vec::with_capacity(threads);

        for index in 0..threads {
            let poll = polls.remove(0);
            let inbox = receivers.remove(0);
            let my_sender = senders[index].clone();
            let peer_senders = senders.clone();
            let my_waker = wakers[index].clone();
            let all_wakers = wakers.clone();
            let state = state.clone();
            let shutdown = shutdown.clone();
            let owned_listener = if index == 0 { listener.take() } else { None };

            let handle = std::thread::Builder::new()
                .name(format!("throttle-worker-{index}"))
                .spawn(move || {
                    boot_worker(index, threads, ThreadPriority::OSDefault);
                    let mut worker = Worker {
                        index,
                        total: threads,
                        poll,
                        events: Events::with_capacity(256),
                        connections: HashMap::new(),
                        next_token: 0,
                        next_accept_target: 0,
                        inbox,
                        my_sender,
                        my_waker,
                        peer_senders,
                        all_wakers,
                        state,
                        shutdown,
                        listener: owned_listener,
                    };
                    worker.run();
                })?;
            handles.push(handle);
        }

        info!(threads, "throttle-server started");
        Ok(Server { shutdown, wakers, handles })
    }

    /// Runs the cancellation sequence up to stopping the reactor: callers
    /// that need to dump storage between steps 2 and 4 should call
    /// `State::dump` themselves before calling this.
    pub fn stop(self) {
        self.shutdown.store(true, Relaxed);
        for waker in &self.wakers {
            let _ = waker.wake();
        }
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

struct Worker {
    index: usize,
    total: usize,
    poll: Poll,
    events: Events,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    next_accept_target: usize,
    inbox: Receiver<WorkerMsg>,
    my_sender: Sender<WorkerMsg>,
    my_waker: Arc<Waker>,
    peer_senders: Vec<Sender<WorkerMsg>>,
    all_wakers: Vec<Arc<Waker>>,
    state: Arc<State>,
    shutdown: Arc<AtomicBool>,
    listener: Option<Listener>,
}

struct ReadyEvent {
    token: Token,
    readable: bool,
    writable: bool,
}

impl Worker {
    fn run(&mut self) {
        if let Some(listener) = &mut self.listener {
            if let Err(err) = listener.register(self.poll.registry()) {
                warn!(?err, "failed to register listener, worker exiting");
                return;
            }
        }

        while !self.shutdown.load(Relaxed) {
            let timeout = self.next_timeout();
            if let Err(err) = self.poll.poll(&mut self.events, Some(timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                warn!(?err, "poll failed");
                continue;
            }
            if self.shutdown.load(Relaxed) {
                break;
            }

            let ready: Vec<ReadyEvent> = self
                .events
                .iter()
                .map(|e| ReadyEvent { token: e.token(), readable: e.is_readable(), writable: e.is_writable() })
                .collect();

            for event in ready {
                match event.token {
                    WAKE_TOKEN => self.drain_inbox(),
                    LISTENER_TOKEN => self.accept_loop(),
                    token => self.service_connection(token, event.readable, event.writable),
                }
            }

            self.state.roll_metrics_if_due();
            if self.index == 0 {
                self.maybe_sweep();
            }
        }

        for (_, mut conn) in self.connections.drain() {
            conn.close(self.poll.registry());
        }
    }

    fn next_timeout(&self) -> StdDuration {
        if self.index != 0 {
            return IDLE_POLL;
        }
        let guard = self.state.storage.lock().expect("storage mutex poisoned");
        match guard.scheduler.armed_at() {
            Some(at) => {
                let now = Nanos::now();
                if at <= now { StdDuration::from_millis(0) } else { StdDuration::from_nanos((at - now).0) }
            }
            None => IDLE_POLL,
        }
        .min(IDLE_POLL)
    }

    fn maybe_sweep(&self) {
        let now = Nanos::now();
        let mut guard = self.state.storage.lock().expect("storage mutex poisoned");
        if guard.scheduler.due(now) {
            let throttle_store::StorageState { storage, scheduler } = &mut *guard;
            let report = scheduler.sweep(storage, now);
            debug!(marked = report.marked, erased = report.erased, "expiration sweep");
        }
    }

    fn accept_loop(&mut self) {
        loop {
            let Some(listener) = &self.listener else { return };
            let (socket, peer_addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    warn!(?err, "accept failed");
                    return;
                }
            };

            let target = self.next_accept_target % self.total.max(1);
            self.next_accept_target = self.next_accept_target.wrapping_add(1);
            if target == self.index {
                self.adopt(socket, peer_addr);
            } else if self.peer_senders[target].send(WorkerMsg::Accepted { socket, peer_addr }).is_ok() {
                let _ = self.all_wakers[target].wake();
            }
        }
    }

    fn drain_inbox(&mut self) {
        while let Ok(msg) = self.inbox.try_recv() {
            match msg {
                WorkerMsg::Accepted { socket, peer_addr } => self.adopt(socket, peer_addr),
                WorkerMsg::Deliver { token, payload } => {
                    let registry = self.poll.registry();
                    let outcome = match self.connections.get_mut(&token) {
                        Some(conn) => Some(conn.enqueue(registry, payload)),
                        None => None,
                    };
                    if outcome == Some(ConnState::Disconnected) {
                        self.teardown(token);
                    }
                }
            }
        }
    }

    fn adopt(&mut self, socket: Socket, peer_addr: Option<SocketAddr>) {
        let conn_id = self.state.generate_connection_id();
        let token = Token(self.mint_local_token());

        let mut connection = Connection::new(socket, peer_addr, conn_id);
        if let Err(err) = connection.register(self.poll.registry(), token) {
            warn!(?err, "failed to register accepted connection");
            return;
        }

        let kind = match peer_addr {
            Some(_) => TransportKind::Tcp,
            None => TransportKind::Local,
        };
        let peer: Arc<dyn Peer> =
            Arc::new(PeerHandle { sender: self.my_sender.clone(), waker: self.my_waker.clone(), token });
        let record = ConnectionRecord {
            id: conn_id,
            kind,
            remote_ip: peer_addr.map(|a| a.ip()),
            remote_port: peer_addr.map(|a| a.port()).unwrap_or(0),
            connected_at: Nanos::now(),
            accumulators: ConnectionAccumulators::default(),
            opcode_counters: OpcodeCounters::default(),
            peer,
        };
        self.state.connections.lock().expect("connections mutex poisoned").insert(record);
        self.connections.insert(token, connection);
    }

    /// Local token space is per-worker (each worker owns an independent
    /// `Poll`); it is disjoint from `ConnectionId`, which is the global key
    /// into `state.connections`.
    fn mint_local_token(&mut self) -> usize {
        loop {
            let candidate = self.next_token % (usize::MAX - 2);
            self.next_token = self.next_token.wrapping_add(1);
            if !self.connections.contains_key(&Token(candidate)) {
                return candidate;
            }
        }
    }

    fn service_connection(&mut self, token: Token, readable: bool, writable: bool) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let conn_id = conn.id;
        let registry = self.poll.registry();

        if conn.poll_write(registry, writable) == ConnState::Disconnected {
            self.teardown(token);
            return;
        }

        let mut frames: Vec<Vec<u8>> = Vec::new();
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let read_state = conn.poll_read(readable, |frame| frames.push(frame.to_vec()));

        for frame in &frames {
            self.handle_frame(token, conn_id, frame);
        }

        if read_state == ConnState::Disconnected {
            self.teardown(token);
        }
    }

    fn handle_frame(&mut self, token: Token, conn_id: throttle_store::ConnectionId, frame: &[u8]) {
        let response = match throttle_protocol::Request::parse(frame) {
            Ok(request) => {
                let opcode = request.opcode();
                self.state.record_request(opcode);
                if let Some(record) = self.state.connections.lock().expect("connections mutex poisoned").get(conn_id)
                {
                    record.opcode_counters.record(opcode);
                    record.accumulators.read_bytes.fetch_add(frame.len() as u64, std::sync::atomic::Ordering::Relaxed);
                }
                dispatch(&self.state, conn_id, request)
            }
            Err(err) => {
                debug!(?err, "malformed frame");
                vec![throttle_protocol::STATUS_FAIL]
            }
        };

        if let Some(record) = self.state.connections.lock().expect("connections mutex poisoned").get(conn_id) {
            record.accumulators.write_bytes.fetch_add(response.len() as u64, std::sync::atomic::Ordering::Relaxed);
        }

        let registry = self.poll.registry();
        let disconnected = self
            .connections
            .get_mut(&token)
            .map(|conn| conn.enqueue(registry, Arc::new(response)) == ConnState::Disconnected)
            .unwrap_or(false);
        if disconnected {
            self.teardown(token);
        }
    }

    fn teardown(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            conn.close(self.poll.registry());
            self.state.connections.lock().expect("connections mutex poisoned").remove(conn.id);
            self.state.subscriptions.lock().expect("subscriptions mutex poisoned").drop_all_for(conn.id);
        }
    }
}
