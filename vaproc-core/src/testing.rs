//! In-memory accelerator for tests.
//!
//! Records every create/destroy as a [`FakeEvent`] and every rendered
//! pipeline buffer as a [`Job`], and fails any call named in its failure set.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::filter::FilterError;
use crate::frame::VideoFormat;
use crate::lifecycle::FilterSetup;
use crate::va::{
    BufferId, ConfigId, ContextId, FilterCaps, FilterParam, FilterType, PipelineCaps,
    PipelineParams, SessionSource, SurfaceId, VaError, VaSession, ValueRange,
};

/// VA_STATUS_ERROR_OPERATION_FAILED
const STATUS_OPERATION_FAILED: i32 = 0x0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeCall {
    CreateSurfaces,
    CreateConfig,
    CreateContext,
    QueryFilters,
    QueryFilterCaps,
    QueryPipelineCaps,
    CreateFilterBuffer,
    CreatePipelineBuffer,
    MapFilterBuffer,
    MapPipelineBuffer,
    BeginPicture,
    RenderPicture,
    EndPicture,
}

impl FakeCall {
    fn name(self) -> &'static str {
        match self {
            FakeCall::CreateSurfaces => "vaCreateSurfaces",
            FakeCall::CreateConfig => "vaCreateConfig",
            FakeCall::CreateContext => "vaCreateContext",
            FakeCall::QueryFilters => "vaQueryVideoProcFilters",
            FakeCall::QueryFilterCaps => "vaQueryVideoProcFilterCaps",
            FakeCall::QueryPipelineCaps => "vaQueryVideoProcPipelineCaps",
            FakeCall::CreateFilterBuffer | FakeCall::CreatePipelineBuffer => "vaCreateBuffer",
            FakeCall::MapFilterBuffer | FakeCall::MapPipelineBuffer => "vaMapBuffer",
            FakeCall::BeginPicture => "vaBeginPicture",
            FakeCall::RenderPicture => "vaRenderPicture",
            FakeCall::EndPicture => "vaEndPicture",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Surfaces,
    Config,
    Context,
    FilterBuffer,
    PipelineBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeEvent {
    Created(Resource),
    Destroyed(Resource),
}

/// One rendered pipeline buffer, with the filter buffers it pointed at as
/// they were at render time.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub target: SurfaceId,
    pub pipeline: PipelineParams,
    pub filters: Vec<Vec<FilterParam>>,
}

enum Buffer {
    Filter(Vec<FilterParam>),
    Pipeline(PipelineParams),
}

#[derive(Default)]
struct State {
    next_id: u32,
    filters: Vec<FilterType>,
    caps: HashMap<FilterType, FilterCaps>,
    pipeline_caps: PipelineCaps,
    failing: HashSet<FakeCall>,
    buffers: HashMap<BufferId, Buffer>,
    target: Option<SurfaceId>,
    events: Vec<FakeEvent>,
    jobs: Vec<Job>,
}

impl State {
    fn check(&self, call: FakeCall) -> Result<(), VaError> {
        if self.failing.contains(&call) {
            return Err(VaError::call(call.name(), STATUS_OPERATION_FAILED));
        }
        Ok(())
    }

    fn id(&mut self) -> u32 {
        self.next_id += 1;
        0x100 + self.next_id
    }
}

pub struct FakeDevice {
    state: Mutex<State>,
}

/// Test handle on a fake device. Builder methods configure what the device
/// advertises; [`FakeSession::session`] hands out the shared session.
pub struct FakeSession {
    device: Arc<FakeDevice>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            device: Arc::new(FakeDevice {
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn with_filters(self, filters: &[FilterType]) -> Self {
        self.device.state.lock().filters.extend_from_slice(filters);
        self
    }

    pub fn with_caps(self, filter: FilterType, caps: FilterCaps) -> Self {
        self.device.state.lock().caps.insert(filter, caps);
        self
    }

    pub fn with_range_caps(self, filter: FilterType, range: ValueRange) -> Self {
        self.with_caps(filter, FilterCaps::Range(vec![range]))
    }

    pub fn with_pipeline_caps(self, caps: PipelineCaps) -> Self {
        self.device.state.lock().pipeline_caps = caps;
        self
    }

    pub fn failing(self, call: FakeCall) -> Self {
        self.set_failing(call, true);
        self
    }

    pub fn set_failing(&self, call: FakeCall, failing: bool) {
        let mut state = self.device.state.lock();
        if failing {
            state.failing.insert(call);
        } else {
            state.failing.remove(&call);
        }
    }

    pub fn session(&self) -> Arc<dyn VaSession> {
        self.device.clone()
    }

    /// A source whose every hold fails.
    pub fn refusing_source(&self) -> RefusingSource {
        RefusingSource
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.device.state.lock().events.clone()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.device.state.lock().jobs.clone()
    }

    pub fn live_buffers(&self) -> usize {
        self.device.state.lock().buffers.len()
    }

    /// Current contents of a filter parameter buffer.
    pub fn filter_params(&self, buffer: BufferId) -> Option<Vec<FilterParam>> {
        match self.device.state.lock().buffers.get(&buffer) {
            Some(Buffer::Filter(params)) => Some(params.clone()),
            _ => None,
        }
    }
}

pub struct RefusingSource;

impl SessionSource for RefusingSource {
    fn hold(&self) -> Result<Arc<dyn VaSession>, VaError> {
        Err(VaError::NoDisplay("fake device refused".into()))
    }
}

impl VaSession for FakeDevice {
    fn create_surfaces(
        &self,
        _format: &VideoFormat,
        count: usize,
    ) -> Result<Vec<SurfaceId>, VaError> {
        let mut state = self.state.lock();
        state.check(FakeCall::CreateSurfaces)?;
        let ids = (0..count).map(|_| SurfaceId(state.id())).collect();
        state.events.push(FakeEvent::Created(Resource::Surfaces));
        Ok(ids)
    }

    fn destroy_surfaces(&self, _surfaces: &[SurfaceId]) {
        self.state
            .lock()
            .events
            .push(FakeEvent::Destroyed(Resource::Surfaces));
    }

    fn create_config(&self) -> Result<ConfigId, VaError> {
        let mut state = self.state.lock();
        state.check(FakeCall::CreateConfig)?;
        state.events.push(FakeEvent::Created(Resource::Config));
        Ok(ConfigId(state.id()))
    }

    fn destroy_config(&self, _config: ConfigId) {
        self.state
            .lock()
            .events
            .push(FakeEvent::Destroyed(Resource::Config));
    }

    fn create_context(
        &self,
        _config: ConfigId,
        _width: u32,
        _height: u32,
        _targets: &[SurfaceId],
    ) -> Result<ContextId, VaError> {
        let mut state = self.state.lock();
        state.check(FakeCall::CreateContext)?;
        state.events.push(FakeEvent::Created(Resource::Context));
        Ok(ContextId(state.id()))
    }

    fn destroy_context(&self, _context: ContextId) {
        self.state
            .lock()
            .events
            .push(FakeEvent::Destroyed(Resource::Context));
    }

    fn query_filters(&self, _context: ContextId) -> Result<Vec<FilterType>, VaError> {
        let state = self.state.lock();
        state.check(FakeCall::QueryFilters)?;
        Ok(state.filters.clone())
    }

    fn query_filter_caps(
        &self,
        _context: ContextId,
        filter: FilterType,
    ) -> Result<FilterCaps, VaError> {
        let state = self.state.lock();
        state.check(FakeCall::QueryFilterCaps)?;
        state
            .caps
            .get(&filter)
            .cloned()
            .ok_or_else(|| VaError::Unsupported(format!("no caps for {:?}", filter)))
    }

    fn query_pipeline_caps(
        &self,
        _context: ContextId,
        _filters: &[BufferId],
    ) -> Result<PipelineCaps, VaError> {
        let state = self.state.lock();
        state.check(FakeCall::QueryPipelineCaps)?;
        Ok(state.pipeline_caps)
    }

    fn create_filter_buffer(
        &self,
        _context: ContextId,
        params: &[FilterParam],
    ) -> Result<BufferId, VaError> {
        let mut state = self.state.lock();
        state.check(FakeCall::CreateFilterBuffer)?;
        let id = BufferId(state.id());
        state.buffers.insert(id, Buffer::Filter(params.to_vec()));
        state.events.push(FakeEvent::Created(Resource::FilterBuffer));
        Ok(id)
    }

    fn create_pipeline_buffer(&self, _context: ContextId) -> Result<BufferId, VaError> {
        let mut state = self.state.lock();
        state.check(FakeCall::CreatePipelineBuffer)?;
        let id = BufferId(state.id());
        state
            .buffers
            .insert(id, Buffer::Pipeline(PipelineParams::default()));
        state.events.push(FakeEvent::Created(Resource::PipelineBuffer));
        Ok(id)
    }

    fn map_filter_buffer(
        &self,
        buffer: BufferId,
        update: &mut dyn FnMut(&mut [FilterParam]),
    ) -> Result<(), VaError> {
        let mut state = self.state.lock();
        state.check(FakeCall::MapFilterBuffer)?;
        match state.buffers.get_mut(&buffer) {
            Some(Buffer::Filter(params)) => {
                update(params);
                Ok(())
            }
            _ => Err(VaError::UnknownBuffer(buffer)),
        }
    }

    fn map_pipeline_buffer(
        &self,
        buffer: BufferId,
        update: &mut dyn FnMut(&mut PipelineParams),
    ) -> Result<(), VaError> {
        let mut state = self.state.lock();
        state.check(FakeCall::MapPipelineBuffer)?;
        match state.buffers.get_mut(&buffer) {
            Some(Buffer::Pipeline(params)) => {
                update(params);
                Ok(())
            }
            _ => Err(VaError::UnknownBuffer(buffer)),
        }
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        let mut state = self.state.lock();
        let resource = match state.buffers.remove(&buffer) {
            Some(Buffer::Filter(_)) => Resource::FilterBuffer,
            Some(Buffer::Pipeline(_)) => Resource::PipelineBuffer,
            None => return,
        };
        state.events.push(FakeEvent::Destroyed(resource));
    }

    fn begin_picture(&self, _context: ContextId, target: SurfaceId) -> Result<(), VaError> {
        let mut state = self.state.lock();
        state.check(FakeCall::BeginPicture)?;
        state.target = Some(target);
        Ok(())
    }

    fn render_picture(&self, _context: ContextId, buffers: &[BufferId]) -> Result<(), VaError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.check(FakeCall::RenderPicture)?;
        let Some(target) = state.target else {
            return Err(VaError::call("vaRenderPicture", STATUS_OPERATION_FAILED));
        };

        for id in buffers {
            let Some(Buffer::Pipeline(pipeline)) = state.buffers.get(id) else {
                return Err(VaError::UnknownBuffer(*id));
            };
            let filters = pipeline
                .filters
                .iter()
                .map(|f| match state.buffers.get(f) {
                    Some(Buffer::Filter(params)) => params.clone(),
                    _ => Vec::new(),
                })
                .collect();
            let job = Job {
                target,
                pipeline: pipeline.clone(),
                filters,
            };
            state.jobs.push(job);
        }
        Ok(())
    }

    fn end_picture(&self, _context: ContextId) -> Result<(), VaError> {
        let mut state = self.state.lock();
        state.check(FakeCall::EndPicture)?;
        state.target = None;
        Ok(())
    }
}

/// Noise reduction setup with a fixed zero value, for tests that only need
/// an open instance.
pub struct StaticSetup;

impl FilterSetup for StaticSetup {
    fn filter_type(&self) -> FilterType {
        FilterType::NoiseReduction
    }

    fn init_params(
        &mut self,
        session: &dyn VaSession,
        context: ContextId,
    ) -> Result<Vec<FilterParam>, FilterError> {
        session.query_filter_caps(context, FilterType::NoiseReduction)?;
        Ok(vec![FilterParam::Value {
            filter: FilterType::NoiseReduction,
            value: 0.0,
        }])
    }
}
