//! # Filter Resources
//!
//! Everything one filter instance owns on the accelerator, acquired in a
//! fixed order and released in exactly the reverse order:
//!
//! ```text
//! hold session ─► surface pool ─► config ─► context ─► filter check
//!     ─► filter params ─► parameter buffer ─► pipeline caps ─► ready
//! ```
//!
//! Each acquired handle is wrapped in a scoped owner, so a failure at any
//! step drops only what was acquired before it (locals drop in reverse
//! declaration order), and a ready instance drops its fields in the same
//! reverse order.

use std::fmt;
use std::sync::Arc;

use crate::filter::FilterError;
use crate::frame::{Chroma, VideoFormat};
use crate::pool::SurfacePool;
use crate::va::{
    BufferId, ConfigId, ContextId, FilterParam, FilterType, PipelineCaps, SessionSource, VaError,
    VaSession,
};

/// Output pictures per filter instance.
pub const OUTPUT_POOL_SIZE: usize = 3;

/// Forward path of the open sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleStage {
    Uninitialized,
    SessionHeld,
    PoolAllocated,
    ConfigCreated,
    ContextCreated,
    CapabilityChecked,
    ParamBufferCreated,
    PipelineCapsQueried,
    Ready,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleStage::Uninitialized => "uninitialized",
            LifecycleStage::SessionHeld => "session held",
            LifecycleStage::PoolAllocated => "pool allocated",
            LifecycleStage::ConfigCreated => "config created",
            LifecycleStage::ContextCreated => "context created",
            LifecycleStage::CapabilityChecked => "capability checked",
            LifecycleStage::ParamBufferCreated => "parameter buffer created",
            LifecycleStage::PipelineCapsQueried => "pipeline caps queried",
            LifecycleStage::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Filter-specific steps of the open sequence.
pub(crate) trait FilterSetup {
    fn filter_type(&self) -> FilterType;

    /// Query the filter's capabilities and build the initial contents of the
    /// parameter buffer.
    fn init_params(
        &mut self,
        session: &dyn VaSession,
        context: ContextId,
    ) -> Result<Vec<FilterParam>, FilterError>;

    fn use_pipeline_caps(&mut self, _caps: &PipelineCaps) -> Result<(), FilterError> {
        Ok(())
    }
}

// ============================================================================
// Scoped Handles
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Handle {
    Config(ConfigId),
    Context(ContextId),
    Buffer(BufferId),
}

/// Destroys its handle on drop.
pub(crate) struct Scoped {
    session: Arc<dyn VaSession>,
    handle: Handle,
}

impl Scoped {
    pub(crate) fn config(session: &Arc<dyn VaSession>) -> Result<Self, VaError> {
        let id = session.create_config()?;
        Ok(Self::wrap(session, Handle::Config(id)))
    }

    pub(crate) fn context(
        session: &Arc<dyn VaSession>,
        config: ConfigId,
        format: &VideoFormat,
        pool: &SurfacePool,
    ) -> Result<Self, VaError> {
        let id =
            session.create_context(config, format.width, format.height, pool.surface_ids())?;
        Ok(Self::wrap(session, Handle::Context(id)))
    }

    pub(crate) fn filter_buffer(
        session: &Arc<dyn VaSession>,
        context: ContextId,
        params: &[FilterParam],
    ) -> Result<Self, VaError> {
        let id = session.create_filter_buffer(context, params)?;
        Ok(Self::wrap(session, Handle::Buffer(id)))
    }

    pub(crate) fn pipeline_buffer(
        session: &Arc<dyn VaSession>,
        context: ContextId,
    ) -> Result<Self, VaError> {
        let id = session.create_pipeline_buffer(context)?;
        Ok(Self::wrap(session, Handle::Buffer(id)))
    }

    fn wrap(session: &Arc<dyn VaSession>, handle: Handle) -> Self {
        Self {
            session: Arc::clone(session),
            handle,
        }
    }

    pub(crate) fn config_id(&self) -> ConfigId {
        match self.handle {
            Handle::Config(id) => id,
            _ => ConfigId::INVALID,
        }
    }

    pub(crate) fn context_id(&self) -> ContextId {
        match self.handle {
            Handle::Context(id) => id,
            _ => ContextId::INVALID,
        }
    }

    pub(crate) fn buffer_id(&self) -> BufferId {
        match self.handle {
            Handle::Buffer(id) => id,
            _ => BufferId::INVALID,
        }
    }
}

impl Drop for Scoped {
    fn drop(&mut self) {
        match self.handle {
            Handle::Config(id) => self.session.destroy_config(id),
            Handle::Context(id) => self.session.destroy_context(id),
            Handle::Buffer(id) => self.session.destroy_buffer(id),
        }
    }
}

// ============================================================================
// Filter Resources
// ============================================================================

pub struct FilterResources {
    // Declaration order is teardown order.
    param_buffer: Scoped,
    context: Scoped,
    config: Scoped,
    pool: Arc<SurfacePool>,
    session: Arc<dyn VaSession>,
    pipeline_fast: bool,
    filter: FilterType,
}

impl FilterResources {
    pub(crate) fn open(
        source: &dyn SessionSource,
        fmt_in: &VideoFormat,
        fmt_out: &VideoFormat,
        setup: &mut dyn FilterSetup,
    ) -> Result<Self, FilterError> {
        if fmt_out.chroma != Chroma::Vaapi420 || !fmt_out.is_similar(fmt_in) {
            return Err(FilterError::UnsupportedFormat {
                input: *fmt_in,
                output: *fmt_out,
            });
        }

        let filter = setup.filter_type();
        let mut stage = LifecycleStage::Uninitialized;
        let result = Self::acquire(source, fmt_out, setup, filter, &mut stage);
        match &result {
            Ok(res) => tracing::debug!(
                "{:?}: {} ({})",
                filter,
                LifecycleStage::Ready,
                if res.pipeline_fast { "fast pipeline" } else { "default pipeline" }
            ),
            Err(e) => tracing::warn!("{:?}: open failed after {}: {}", filter, stage, e),
        }
        result
    }

    fn acquire(
        source: &dyn SessionSource,
        format: &VideoFormat,
        setup: &mut dyn FilterSetup,
        filter: FilterType,
        stage: &mut LifecycleStage,
    ) -> Result<Self, FilterError> {
        let mut advance = |next: LifecycleStage| {
            tracing::trace!("{:?}: {}", filter, next);
            *stage = next;
        };

        let session = source.hold()?;
        advance(LifecycleStage::SessionHeld);

        let pool = SurfacePool::new(Arc::clone(&session), OUTPUT_POOL_SIZE, format)?;
        advance(LifecycleStage::PoolAllocated);

        let config = Scoped::config(&session)?;
        advance(LifecycleStage::ConfigCreated);

        let context = Scoped::context(&session, config.config_id(), format, &pool)?;
        advance(LifecycleStage::ContextCreated);

        if !session.is_filter_available(context.context_id(), filter)? {
            return Err(FilterError::FilterUnavailable(filter));
        }
        advance(LifecycleStage::CapabilityChecked);

        let params = setup.init_params(session.as_ref(), context.context_id())?;
        let param_buffer = Scoped::filter_buffer(&session, context.context_id(), &params)?;
        advance(LifecycleStage::ParamBufferCreated);

        let caps =
            session.query_pipeline_caps(context.context_id(), &[param_buffer.buffer_id()])?;
        let pipeline_fast = caps.is_fast();
        setup.use_pipeline_caps(&caps)?;
        advance(LifecycleStage::PipelineCapsQueried);

        Ok(Self {
            param_buffer,
            context,
            config,
            pool,
            session,
            pipeline_fast,
            filter,
        })
    }

    pub fn session(&self) -> &Arc<dyn VaSession> {
        &self.session
    }

    pub fn pool(&self) -> &Arc<SurfacePool> {
        &self.pool
    }

    pub fn context_id(&self) -> ContextId {
        self.context.context_id()
    }

    pub fn config_id(&self) -> ConfigId {
        self.config.config_id()
    }

    pub fn param_buffer_id(&self) -> BufferId {
        self.param_buffer.buffer_id()
    }

    pub fn pipeline_fast(&self) -> bool {
        self.pipeline_fast
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter
    }
}
