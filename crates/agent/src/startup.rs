use std::path::Path;
use std::sync::Arc;

use adapters::clock::SystemMonotonicClock;
use adapters::ebpf::{FlowMapAdapter, FlowPrograms, GlobalCountersReader, RingReader};
use adapters::export::{ChannelSink, drain_boundary};
use adapters::iface::{NetlinkAddrs, NetlinkLister, NetlinkWatcher, Poller};
use application::accounter::Accounter;
use application::dedupe_stage::DedupeStage;
use application::iface_manager::InterfaceManager;
use application::map_tracer::MapTracer;
use domain::flow::deduper::Deduper;
use infrastructure::config::{AgentConfig, DeduperMode, ListenMode};
use infrastructure::constants::{DEFAULT_EBPF_PROGRAM_DIR_DEV, FLOW_PROGRAM_OBJECT};
use infrastructure::logging::init_logging;
use infrastructure::metrics::AgentMetrics;
use ports::secondary::clock_port::MonotonicClock;
use ports::secondary::iface_port::InterfaceInformerPort;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::sink_port::RecordSinkPort;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::shutdown::Shutdown;

/// Run the agent startup sequence and block until shutdown.
#[allow(clippy::too_many_lines)] // startup is inherently sequential and long
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Load config ──────────────────────────────────────────────
    let config = AgentConfig::load(Path::new(&cli.config))?;

    // ── 2. Initialize logging ───────────────────────────────────────
    // CLI flags take precedence over config file
    let log_level = cli.log_level.unwrap_or(config.agent.log_level);
    let log_format = cli.log_format.unwrap_or(config.agent.log_format);
    init_logging(log_level, log_format)?;

    // Service root span — fields appear in every subsequent log entry
    let _root_span = tracing::span!(
        tracing::Level::INFO,
        "service",
        service.name = "flowlens",
        service.version = env!("CARGO_PKG_VERSION"),
    )
    .entered();

    info!(
        config_path = %cli.config,
        log_level = log_level.as_str(),
        log_format = log_format.as_str(),
        "flowlens agent starting"
    );

    // ── 3. Derived settings (validated at load) ─────────────────────
    let evict_timeout = config.flows.cache_active_timeout()?;
    let stale_timeout = config.flows.stale_entries_evict_timeout()?;
    let direction = config.flows.direction()?;
    let buffers_length = config.flows.buffers_length;
    let filter = config.interfaces.filter()?;

    for (enabled, tracker) in [
        (config.trackers.enable_rtt, "rtt"),
        (config.trackers.enable_dns_tracking, "dns"),
        (config.trackers.enable_pkt_drops, "pkt_drops"),
        (config.trackers.enable_pca, "pca"),
    ] {
        if enabled {
            warn!(tracker, "optional tracker requested but not part of this build, ignoring");
        }
    }

    // ── 4. Metrics ──────────────────────────────────────────────────
    let metrics: Arc<dyn MetricsPort> = Arc::new(AgentMetrics::new());

    // ── 5. Load the classifier object and carve up its maps ─────────
    let program_bytes = read_program_object(&config.agent.ebpf_program_dir)?;
    let mut programs = FlowPrograms::load(
        &program_bytes,
        config.flows.sampling,
        config.flows.cache_max_flows,
    )?;
    let flow_map = FlowMapAdapter::new(programs.ebpf_mut(), Arc::clone(&metrics))?;
    let counters = GlobalCountersReader::new(programs.ebpf_mut())?;
    let ring_reader = RingReader::new(programs.ebpf_mut(), Arc::clone(&metrics), evict_timeout)?;
    let classifier = programs.into_classifier(direction.ingress(), direction.egress())?;

    // ── 6. Interface manager ────────────────────────────────────────
    let manager = Arc::new(InterfaceManager::new(
        filter,
        Arc::new(classifier),
        NetlinkAddrs,
        Arc::clone(&metrics),
    ));
    let namer = manager.namer();

    // ── 7. Pipeline services ────────────────────────────────────────
    let clock: Arc<dyn MonotonicClock> = Arc::new(SystemMonotonicClock::probe()?);
    let tracer = MapTracer::new(
        Box::new(flow_map),
        Arc::clone(&clock),
        Arc::clone(&metrics),
        Arc::clone(&namer),
        evict_timeout,
        stale_timeout,
    );
    let trigger = tracer.trigger();
    let accounter = Accounter::new(
        config.flows.cache_max_flows as usize,
        evict_timeout,
        clock,
        Arc::clone(&metrics),
        namer,
    );
    let (sink, export_rx) = ChannelSink::new(buffers_length, Arc::clone(&metrics));
    let deduper = match config.deduper.mode()? {
        DeduperMode::FirstCome => Some(Deduper::new(
            config.deduper.fc_expiry(evict_timeout)?,
            config.deduper.just_mark,
            config.deduper.merge,
        )),
        DeduperMode::None => None,
    };
    let stage = DedupeStage::new(deduper, Arc::new(sink) as Arc<dyn RecordSinkPort>);

    // tracer ─┬─> dedupe stage ─> sink ─> exporter boundary
    // ring ───┴─ accounter
    let (batch_tx, batch_rx) = mpsc::channel(buffers_length);
    let (raw_tx, raw_rx) = mpsc::channel(buffers_length);

    // ── 8. Launch ───────────────────────────────────────────────────
    let shutdown = Shutdown::install();
    let cancel = shutdown.token();

    let informer: Box<dyn InterfaceInformerPort> = match config.interfaces.listen_mode()? {
        ListenMode::Watch => Box::new(NetlinkWatcher::new(buffers_length)),
        ListenMode::Poll => Box::new(Poller::new(
            config.interfaces.listen_poll_period()?,
            buffers_length,
            NetlinkLister,
        )),
    };
    let manager_task = {
        let manager = Arc::clone(&manager);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.run(informer.as_ref(), cancel).await {
                error!(error = %e, "interface manager failed");
            }
        })
    };

    let tracer_task = tokio::spawn(tracer.run(batch_tx.clone(), cancel.clone()));
    let ring_task = tokio::spawn(ring_reader.run(raw_tx, trigger, cancel.clone()));
    // the next three stages end when their input channels close, which
    // gives the final eviction batches time to flow all the way out
    let accounter_task = tokio::spawn(accounter.run(raw_rx, batch_tx, CancellationToken::new()));
    let stage_task = tokio::spawn(stage.run(batch_rx, CancellationToken::new()));
    let export_task = tokio::spawn(drain_boundary(export_rx, CancellationToken::new()));

    let scraper_task = {
        let cancel = cancel.clone();
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(evict_timeout);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let (hashmap_dropped, ringbuf_dropped) = counters.read();
                        metrics.set_kernel_drop_counters(hashmap_dropped, ringbuf_dropped);
                    }
                }
            }
        })
    };

    info!("flowlens agent started");
    shutdown
        .wait_and_drain(vec![
            manager_task,
            tracer_task,
            ring_task,
            accounter_task,
            stage_task,
            export_task,
            scraper_task,
        ])
        .await;

    info!("flowlens agent stopped");
    Ok(())
}

/// Locate the compiled classifier object: configured directory first,
/// then the local development build tree.
fn read_program_object(dir: &str) -> anyhow::Result<Vec<u8>> {
    let primary = Path::new(dir).join(FLOW_PROGRAM_OBJECT);
    if primary.exists() {
        return Ok(std::fs::read(&primary)?);
    }
    let dev = Path::new(DEFAULT_EBPF_PROGRAM_DIR_DEV).join(FLOW_PROGRAM_OBJECT);
    if dev.exists() {
        warn!(path = %dev.display(), "using development classifier object");
        return Ok(std::fs::read(&dev)?);
    }
    anyhow::bail!(
        "classifier object '{FLOW_PROGRAM_OBJECT}' not found in '{dir}' or '{DEFAULT_EBPF_PROGRAM_DIR_DEV}' (run `cargo xtask ebpf-build`)"
    )
}
