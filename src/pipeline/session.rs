//! Index session: the state machine mediating all external entry
//! (§4.6 Admin operations, §6 Session API).

use super::request::Request;
use super::triage::Triage;
use super::zone_thread;
use crate::config::Config;
use crate::error::{BadStateError, CorruptDataError, Error, Result};
use crate::metrics::Metrics;
use crate::open_chapter::ChapterWriter;
use crate::sparse_cache::SparseCache;
use crate::stats::Stats;
use crate::volume::Volume;
use crate::volume_index::VolumeIndex;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Barrier;
use tracing::{info, info_span};

const SAVED_STATE_MAGIC: &[u8; 8] = b"UDSSAVE1";

/// Bundle the open-chapter bytes and volume-index bytes into one blob
/// for [`Volume::save_state`] (§4.6/§6 Save format).
fn encode_saved_state(writer_bytes: &[u8], volume_index_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + writer_bytes.len() + volume_index_bytes.len());
    out.extend_from_slice(SAVED_STATE_MAGIC);
    out.extend_from_slice(&(writer_bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(writer_bytes);
    out.extend_from_slice(&(volume_index_bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(volume_index_bytes);
    out
}

/// Split a blob previously produced by [`encode_saved_state`] back into
/// its open-chapter and volume-index sections.
fn decode_saved_state(bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    if bytes.len() < 16 || &bytes[0..8] != SAVED_STATE_MAGIC {
        return Err(CorruptDataError::HeaderMismatch("unrecognized session save-state magic".into()).into());
    }
    let mut pos = 8usize;
    let writer_len = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap()) as usize;
    pos += 8;
    if bytes.len() < pos + writer_len + 8 {
        return Err(CorruptDataError::InvalidOffsets("session save-state truncated in open-chapter section".into()).into());
    }
    let writer_bytes = bytes[pos..pos + writer_len].to_vec();
    pos += writer_len;
    let volume_index_len = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap()) as usize;
    pos += 8;
    if bytes.len() < pos + volume_index_len {
        return Err(CorruptDataError::InvalidOffsets("session save-state truncated in volume-index section".into()).into());
    }
    let volume_index_bytes = bytes[pos..pos + volume_index_len].to_vec();
    Ok((writer_bytes, volume_index_bytes))
}

/// The session lifecycle (§4.6, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Opening,
    Online,
    Suspending,
    Suspended,
    Closing,
    Failed,
}

impl SessionState {
    fn label(self) -> &'static str {
        match self {
            SessionState::Unopened => "unopened",
            SessionState::Opening => "opening",
            SessionState::Online => "online",
            SessionState::Suspending => "suspending",
            SessionState::Suspended => "suspended",
            SessionState::Closing => "closing",
            SessionState::Failed => "failed",
        }
    }
}

/// A deduplication index session.
///
/// The source runs a dedicated triage thread, one thread per zone, a
/// reader-thread pool, and a chapter-writer thread, communicating
/// through MPSC queues (§5). This crate keeps the thread-backed pieces
/// that have a real, independently testable concurrency contract (the
/// volume's [`ReaderPool`](crate::volume::ReaderPool) and the sparse
/// cache's barrier protocol) but processes `launch_request` inline on
/// the caller's thread rather than handing it to a background triage
/// and zone thread pool — the request still passes through triage and
/// the same zone-processing step the source describes (§4.6), just
/// without the extra thread hop. See DESIGN.md for the full rationale.
pub struct Session {
    config: Config,
    state: Mutex<SessionState>,
    volume: Option<Volume>,
    volume_index: Mutex<VolumeIndex>,
    writer: Mutex<ChapterWriter>,
    sparse_cache: Option<SparseCache>,
    metrics: Arc<Metrics>,
    zone_count: u32,
    nonce: u64,
    open_chapter_capacity_watermark: AtomicU64,
}

impl Session {
    /// `create_session`: build an unopened session from validated
    /// configuration, without touching the backing volume yet.
    pub fn create_session(config: Config) -> Result<Self> {
        let geometry = config.derive_geometry()?;
        let zone_count = config.resolved_zone_count();
        let nonce = config.security.nonce;
        let metrics = Arc::new(Metrics::new()?);
        let sparse_cache = if geometry.is_sparse() {
            Some(SparseCache::new(config.cache.cache_chapters as usize, zone_count))
        } else {
            None
        };
        Ok(Self {
            volume_index: Mutex::new(VolumeIndex::new(geometry, zone_count)),
            writer: Mutex::new(ChapterWriter::new(geometry, nonce, zone_count)),
            config,
            state: Mutex::new(SessionState::Unopened),
            volume: None,
            sparse_cache,
            metrics,
            zone_count,
            nonce,
            open_chapter_capacity_watermark: AtomicU64::new(0),
        })
    }

    /// `open_index`: format/open the backing volume, rebuild from it,
    /// and transition to `Online`.
    pub fn open_index(&mut self) -> Result<()> {
        let span = info_span!("uds_index::pipeline::session");
        let _guard = span.enter();
        *self.state.lock() = SessionState::Opening;

        let geometry = self.config.derive_geometry()?;
        let volume = Volume::open(
            &self.config.volume.data_path,
            geometry,
            self.nonce,
            self.config.zones.read_threads,
            self.config.cache.cache_chapters,
        )?;
        if let Some(saved) = volume.load_state()? {
            let (writer_bytes, volume_index_bytes) = decode_saved_state(&saved)?;
            let writer = ChapterWriter::load(geometry, self.nonce, &writer_bytes)?;
            let volume_index = VolumeIndex::load(geometry, &volume_index_bytes)?;
            *self.writer.lock() = writer;
            *self.volume_index.lock() = volume_index;
            self.volume = Some(volume);
            *self.state.lock() = SessionState::Online;
            info!("index opened from saved state");
            return Ok(());
        }

        let report = volume.rebuild()?;
        {
            let mut volume_index = self.volume_index.lock();
            volume_index.set_open_chapter(report.newest_virtual_chapter + 1)?;
            volume.reindex(0, &mut volume_index, &report)?;
        }
        self.volume = Some(volume);
        *self.state.lock() = SessionState::Online;
        info!(newest_virtual_chapter = report.newest_virtual_chapter, "index opened");
        Ok(())
    }

    /// `close_index`: flush and transition to `Closing` then back to `Unopened`.
    pub fn close_index(&mut self) -> Result<()> {
        self.require_online()?;
        *self.state.lock() = SessionState::Closing;
        if let Some(volume) = &self.volume {
            volume.flush()?;
        }
        self.volume = None;
        *self.state.lock() = SessionState::Unopened;
        Ok(())
    }

    /// `destroy_session`: an alias for dropping the session after closing.
    pub fn destroy_session(mut self) -> Result<()> {
        if *self.state.lock() == SessionState::Online {
            self.close_index()?;
        }
        Ok(())
    }

    /// `launch_request`: route through triage and run it to completion
    /// on a zone, closing the open chapter first if it has filled.
    pub fn launch_request(&self, request: &mut Request) -> Result<()> {
        self.require_online()?;
        self.metrics
            .requests_total
            .with_label_values(&[request_kind_label(request.kind)])
            .inc();

        {
            let mut writer = self.writer.lock();
            if writer.is_full() {
                self.close_current_chapter(&mut writer)?;
            }
        }

        let volume_index = self.volume_index.lock();
        let decision = Triage::new(&volume_index, self.sparse_cache.as_ref()).route(request);
        drop(volume_index);

        if let Some(virtual_chapter) = decision.needs_barrier_for {
            if let (Some(cache), Some(volume)) = (&self.sparse_cache, &self.volume) {
                // A single caller plays every zone's role in the barrier
                // here, since requests are processed inline (see the
                // struct-level doc comment); a one-party barrier still
                // exercises the same admit-then-release protocol.
                let barrier = Barrier::new(1);
                cache.update(0, virtual_chapter, &barrier, || {
                    volume.fetch_chapter_index(decision.zone, virtual_chapter)
                })?;
            }
        }

        let volume = self.volume.as_ref().ok_or_else(|| Error::session_not_online("unopened"))?;
        let mut writer = self.writer.lock();
        let mut volume_index = self.volume_index.lock();
        zone_thread::process(decision.zone, &mut writer, &mut volume_index, volume, request)
    }

    fn close_current_chapter(&self, writer: &mut ChapterWriter) -> Result<()> {
        let volume = self.volume.as_ref().ok_or_else(|| Error::session_not_online("unopened"))?;
        let closed = writer.close()?;
        volume.write_chapter(&closed)?;
        self.metrics.chapters_written_total.inc();
        let mut volume_index = self.volume_index.lock();
        let removed = volume_index.set_open_chapter(closed.virtual_chapter + 1)?;
        self.metrics.early_flushes_total.inc_by(removed as u64);
        self.open_chapter_capacity_watermark.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// `suspend`: drain to a quiescent state and flush the volume's
    /// dirty pages. When `save` is set, also serialize the open chapter
    /// and volume index into the volume's saved-state region so a later
    /// `open_index` can restore them directly instead of rebuilding
    /// (§4.6 Admin operations).
    pub fn suspend(&mut self, save: bool) -> Result<()> {
        self.require_online()?;
        *self.state.lock() = SessionState::Suspending;
        if let Some(volume) = &self.volume {
            if save {
                let writer_bytes = self.writer.lock().save();
                let volume_index_bytes = self.volume_index.lock().save();
                let blob = encode_saved_state(&writer_bytes, &volume_index_bytes);
                volume.save_state(&blob)?;
            }
            volume.flush()?;
        }
        *self.state.lock() = SessionState::Suspended;
        Ok(())
    }

    /// `resume`: return to `Online` from `Suspended`.
    pub fn resume(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != SessionState::Suspended {
            return Err(Error::session_not_online(state.label()));
        }
        *state = SessionState::Online;
        Ok(())
    }

    /// `flush`: wait for in-flight work to quiesce. Requests are
    /// processed synchronously in this crate, so there is never
    /// in-flight background work to wait for; this flushes the
    /// backing volume's dirty pages for symmetry with the source API.
    pub fn flush(&self) -> Result<()> {
        if let Some(volume) = &self.volume {
            volume.flush()?;
        }
        Ok(())
    }

    /// `get_stats`: a point-in-time snapshot of index counters.
    pub fn get_stats(&self) -> Stats {
        Stats::collect(&self.metrics, &self.volume_index.lock())
    }

    /// `get_parameters`: the configuration this session was opened with.
    pub fn get_parameters(&self) -> &Config {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Number of parallel zones this session was configured for.
    pub fn zone_count(&self) -> u32 {
        self.zone_count
    }

    fn require_online(&self) -> Result<()> {
        let state = *self.state.lock();
        if state != SessionState::Online {
            return Err(Error::BadState(BadStateError::SessionNotOnline(state.label().to_string())));
        }
        Ok(())
    }
}

fn request_kind_label(kind: super::request::RequestKind) -> &'static str {
    use super::request::RequestKind;
    match kind {
        RequestKind::Post => "post",
        RequestKind::Update => "update",
        RequestKind::Query => "query",
        RequestKind::QueryNoUpdate => "query_no_update",
    }
}
