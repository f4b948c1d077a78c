// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Connection handler for the infrastructure printer.
//
// Listens on both address families, serves persistent HTTP/1.1 connections,
// hands IPP requests to the dispatcher on the blocking pool, runs the
// reclamation sweep on a timer and advertises the printer over DNS-SD.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use infraprint_core::config::{ServerConfig, PRINTER_RESOURCE};
use infraprint_core::error::{InfraError, Result};
use infraprint_core::types::{Keyword, ServerStatus};

use crate::codec;
use crate::dispatch;
use crate::http::{self, HttpRequest, HttpResponse, IPP_CONTENT_TYPE};
use crate::printer::{Printer, DEFAULT_DOCUMENT_FORMATS};

/// mDNS service type for IPP printers.
const IPP_SERVICE_TYPE: &str = "_ipp._tcp.local.";

/// Printer subtype, so that `_print._sub._ipp._tcp` browsers find us.
const PRINT_SUBTYPE: &str = "_print._sub._ipp._tcp.local.";

/// Pending connection backlog per listener.
const LISTEN_BACKLOG: u32 = 128;

/// Methods advertised in `Allow`.
const ALLOWED_METHODS: &str = "GET, HEAD, OPTIONS, POST";

// ---------------------------------------------------------------------------
// Shared state passed to connection handlers
// ---------------------------------------------------------------------------

struct SharedState {
    printer: Arc<Printer>,
    active_connections: Arc<AtomicU32>,
    max_request_bytes: usize,
}

// ---------------------------------------------------------------------------
// InfraServer
// ---------------------------------------------------------------------------

/// The network face of one [`Printer`].
///
/// Created in `Stopped` state; [`start`](Self::start) opens the listeners and
/// [`stop`](Self::stop) closes them again.
pub struct InfraServer {
    config: ServerConfig,
    printer: Arc<Printer>,
    status: ServerStatus,
    /// Notification handle used to signal a graceful shutdown.
    shutdown_signal: Arc<Notify>,
    /// Handle to the Tokio task running the accept loop.
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
    local_addrs: Vec<SocketAddr>,
    mdns_daemon: Option<mdns_sd::ServiceDaemon>,
    /// The mDNS service fullname (for unregistration on stop).
    mdns_fullname: Option<String>,
}

impl InfraServer {
    pub fn new(config: ServerConfig) -> Self {
        let printer = Arc::new(Printer::new(&config));
        Self {
            config,
            printer,
            status: ServerStatus::Stopped,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
            local_addrs: Vec::new(),
            mdns_daemon: None,
            mdns_fullname: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    pub fn printer(&self) -> &Arc<Printer> {
        &self.printer
    }

    /// Addresses the listeners are bound to, IPv4 first.  Empty until started.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Validate the configuration, prepare the spool directory, open the
    /// listeners and spawn the accept loop.
    ///
    /// # Errors
    ///
    /// Configuration and spool directory failures, a missing operation
    /// handler, or neither address family could be bound.
    pub async fn start(&mut self) -> Result<()> {
        if self.status == ServerStatus::Running {
            debug!(port = self.config.port, "server already running");
            return Ok(());
        }
        self.status = ServerStatus::Starting;

        if let Err(e) = self.prepare() {
            self.status = ServerStatus::Error;
            return Err(e);
        }

        let v4: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let v6: SocketAddr = (std::net::Ipv6Addr::UNSPECIFIED, self.config.port).into();
        let ipv4 = bind_listener(v4);
        let ipv6 = bind_listener(v6);

        let (ipv4, ipv6) = match (ipv4, ipv6) {
            (Err(e4), Err(e6)) => {
                self.status = ServerStatus::Error;
                return Err(InfraError::PrintServer(format!(
                    "bind port {}: {e4} (IPv4), {e6} (IPv6)",
                    self.config.port
                )));
            }
            (ipv4, ipv6) => {
                if let Err(e) = &ipv4 {
                    warn!(addr = %v4, error = %e, "IPv4 listener unavailable");
                }
                if let Err(e) = &ipv6 {
                    debug!(addr = %v6, error = %e, "IPv6 listener unavailable");
                }
                (ipv4.ok(), ipv6.ok())
            }
        };

        self.local_addrs = [&ipv4, &ipv6]
            .into_iter()
            .flatten()
            .filter_map(|l| l.local_addr().ok())
            .collect();
        info!(
            uri = %self.printer.uri,
            addrs = ?self.local_addrs,
            "infrastructure printer listening"
        );

        if self.config.advertise_dns_sd {
            self.register_mdns();
        }

        let shared = Arc::new(SharedState {
            printer: Arc::clone(&self.printer),
            active_connections: Arc::clone(&self.active_connections),
            max_request_bytes: self.config.max_request_bytes,
        });
        let shutdown = Arc::clone(&self.shutdown_signal);
        let sweep_every = Duration::from_secs(self.config.sweep_interval_secs.max(1));

        self.task_handle = Some(tokio::spawn(async move {
            accept_loop(ipv4, ipv6, shutdown, sweep_every, shared).await;
        }));
        self.status = ServerStatus::Running;
        Ok(())
    }

    fn prepare(&self) -> Result<()> {
        self.config.validate()?;
        self.config.ensure_spool_dir()?;
        dispatch::check_handlers()
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    /// Connections already being served run to completion.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }
        info!(port = self.config.port, "stopping infrastructure printer");

        self.unregister_mdns();
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| InfraError::PrintServer(format!("task join: {e}")))?;
        }

        self.local_addrs.clear();
        self.status = ServerStatus::Stopped;
        info!(port = self.config.port, "infrastructure printer stopped");
        Ok(())
    }

    /// Register `_ipp._tcp.local.` with the `_print` subtype.  Failures are
    /// logged; the printer still answers on its address.
    fn register_mdns(&mut self) {
        let daemon = match mdns_sd::ServiceDaemon::new() {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "failed to create mDNS daemon for advertisement");
                return;
            }
        };

        let pdl = DEFAULT_DOCUMENT_FORMATS.join(",");
        let uuid = self
            .printer
            .uuid
            .strip_prefix("urn:uuid:")
            .unwrap_or(&self.printer.uuid);
        let rp = PRINTER_RESOURCE.trim_start_matches('/');
        let properties = [
            ("txtvers", "1"),
            ("qtotal", "1"),
            ("rp", rp),
            ("ty", self.printer.name.as_str()),
            ("pdl", pdl.as_str()),
            ("UUID", uuid),
            ("note", ""),
        ];

        let host = self.config.hostname.trim_end_matches('.');
        let host = format!("{}.local.", host.strip_suffix(".local").unwrap_or(host));

        let info = match mdns_sd::ServiceInfo::new(
            PRINT_SUBTYPE,
            &self.printer.name,
            &host,
            "",
            self.config.port,
            &properties[..],
        ) {
            Ok(info) => info.enable_addr_auto(),
            Err(e) => {
                warn!(error = %e, "failed to create mDNS ServiceInfo");
                return;
            }
        };

        let fullname = info.get_fullname().to_owned();
        match daemon.register(info) {
            Ok(()) => {
                info!(
                    service_type = IPP_SERVICE_TYPE,
                    name = %self.printer.name,
                    port = self.config.port,
                    "mDNS service registered"
                );
                self.mdns_fullname = Some(fullname);
            }
            Err(e) => warn!(error = %e, "failed to register mDNS service"),
        }
        self.mdns_daemon = Some(daemon);
    }

    fn unregister_mdns(&mut self) {
        let Some(daemon) = self.mdns_daemon.take() else {
            return;
        };
        if let Some(fullname) = self.mdns_fullname.take() {
            match daemon.unregister(&fullname) {
                Ok(_) => info!(name = %fullname, "mDNS service unregistered"),
                Err(e) => warn!(error = %e, "failed to unregister mDNS service"),
            }
        }
        if let Err(e) = daemon.shutdown() {
            warn!(error = %e, "failed to shut down mDNS daemon");
        }
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv6() {
        TcpSocket::new_v6()?
    } else {
        TcpSocket::new_v4()?
    };
    socket.set_reuseaddr(true)?;
    // The IPv4 wildcard is bound separately.
    #[cfg(unix)]
    if addr.is_ipv6() {
        set_ipv6_only(&socket)?;
    }
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

#[cfg(unix)]
fn set_ipv6_only(socket: &TcpSocket) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let on: libc::c_int = 1;
    // SAFETY: the descriptor is owned by `socket` and `on` outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IPV6,
            libc::IPV6_V6ONLY,
            (&on as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

async fn accept_on(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Runs until the shutdown signal.  Each connection gets its own task; the
/// sweep runs on every tick while jobs or subscriptions exist.
async fn accept_loop(
    ipv4: Option<TcpListener>,
    ipv6: Option<TcpListener>,
    shutdown: Arc<Notify>,
    sweep_every: Duration,
    shared: Arc<SharedState>,
) {
    let mut sweep = tokio::time::interval(sweep_every);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let accepted = tokio::select! {
            _ = shutdown.notified() => {
                debug!("accept loop received shutdown signal");
                break;
            }
            _ = sweep.tick() => {
                if shared.printer.has_work() {
                    let stats = shared.printer.sweep(Utc::now());
                    if stats.jobs > 0 || stats.subscriptions > 0 {
                        info!(jobs = stats.jobs, subscriptions = stats.subscriptions, "sweep");
                    }
                }
                continue;
            }
            accepted = accept_on(ipv4.as_ref()) => accepted,
            accepted = accept_on(ipv6.as_ref()) => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "incoming connection");
                let state = Arc::clone(&shared);
                tokio::spawn(async move {
                    state.active_connections.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = handle_connection(stream, peer, Arc::clone(&state)).await {
                        warn!(peer = %peer, error = %e, "connection handler error");
                    }
                    state.active_connections.fetch_sub(1, Ordering::Relaxed);
                });
            }
            Err(e) => error!(error = %e, "failed to accept connection"),
        }
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// Serve requests on one connection until the peer closes it or asks for
/// `Connection: close`.  Framing errors are answered with 400 (or 413) and
/// end the connection.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<SharedState>) -> Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let request = match http::read_request(&mut reader, &mut writer, state.max_request_bytes).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!(peer = %peer, "connection closed by peer");
                return Ok(());
            }
            Err(InfraError::Io(e)) => return Err(InfraError::Io(e)),
            Err(e) => {
                let status = match e {
                    InfraError::RequestTooLarge { .. } => 413,
                    _ => 400,
                };
                warn!(peer = %peer, error = %e, status, "bad HTTP request");
                http::write_response(&mut writer, &HttpResponse::new(status), false, false).await?;
                return Ok(());
            }
        };

        let keep_alive = request.head.keep_alive();
        let head_only = request.head.method == "HEAD";
        let response = route(&state, request, peer).await;
        http::write_response(&mut writer, &response, keep_alive, head_only).await?;

        if !keep_alive {
            return Ok(());
        }
    }
}

/// `/ipp/print` or `/ipp/print/<n>`.
fn is_printer_path(path: &str) -> bool {
    match path.strip_prefix(PRINTER_RESOURCE) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('/')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

async fn route(state: &Arc<SharedState>, request: HttpRequest, peer: SocketAddr) -> HttpResponse {
    let head = &request.head;
    if head.version >= (1, 1) && head.header("Host").is_none() {
        return HttpResponse::new(400);
    }

    match head.method.as_str() {
        "OPTIONS" => HttpResponse::new(200).header("Allow", ALLOWED_METHODS),
        "GET" | "HEAD" if head.path == "/" => HttpResponse::html(status_page(&state.printer)),
        "GET" | "HEAD" => HttpResponse::new(404),
        "POST" => {
            if !is_printer_path(&head.path) {
                return HttpResponse::new(404);
            }
            let is_ipp = head.header("Content-Type").is_some_and(|v| {
                v.split(';')
                    .next()
                    .is_some_and(|t| t.trim().eq_ignore_ascii_case(IPP_CONTENT_TYPE))
            });
            if !is_ipp {
                return HttpResponse::new(415);
            }
            serve_ipp(state, request, peer).await
        }
        _ => HttpResponse::new(405).header("Allow", ALLOWED_METHODS),
    }
}

async fn serve_ipp(state: &Arc<SharedState>, request: HttpRequest, peer: SocketAddr) -> HttpResponse {
    let message = match codec::parse(&request.body) {
        Ok(message) => message,
        Err(e) => {
            warn!(peer = %peer, error = %e, "malformed IPP request");
            return HttpResponse::new(400);
        }
    };
    let credentials = request.head.basic_credentials();
    let printer = Arc::clone(&state.printer);
    let peer = peer.to_string();

    // Handlers block on locks, spool I/O and notify-wait.
    let answered = tokio::task::spawn_blocking(move || {
        dispatch::process_request(&printer, &message, credentials, &peer)
    })
    .await;

    match answered {
        Ok(response) => HttpResponse::ipp(response.to_bytes()),
        Err(e) => {
            error!(error = %e, "request handler panicked");
            HttpResponse::new(500)
        }
    }
}

// ---------------------------------------------------------------------------
// Status page
// ---------------------------------------------------------------------------

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// A small HTML page with the printer state and the job table.
pub fn status_page(printer: &Printer) -> String {
    let name = escape_html(&printer.name);
    let reasons = printer.state_reasons().keywords_or_none().join(", ");

    let mut page = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{name}</title></head>\n<body>\n\
         <h1>{name}</h1>\n<p>{uri}</p>\n<p>State: {state} ({reasons})</p>\n",
        uri = escape_html(&printer.uri),
        state = printer.state(),
    );

    let jobs = printer.jobs();
    if jobs.is_empty() {
        page.push_str("<p>No jobs.</p>\n");
    } else {
        page.push_str("<table>\n<tr><th>Job</th><th>Name</th><th>Owner</th><th>State</th></tr>\n");
        for job in &jobs {
            page.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                job.id,
                escape_html(&job.name),
                escape_html(&job.username),
                job.state().keyword(),
            ));
        }
        page.push_str("</table>\n");
    }
    page.push_str("</body>\n</html>\n");
    page
}
