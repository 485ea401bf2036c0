//! Single-strength spatial filters: denoise and sharpen.

use std::sync::Arc;

use crate::config::{Subscription, VarListener, VarStore};
use crate::filter::{FilterContext, FilterError};
use crate::frame::Picture;
use crate::lifecycle::{FilterResources, FilterSetup};
use crate::range::{driver_sigma, Range, SigmaCell, TargetRange};
use crate::submit::{submit, SubmitError, SubmitHooks};
use crate::va::{ContextId, FilterCaps, FilterParam, FilterType, VaSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicKind {
    Denoise,
    Sharpen,
}

impl BasicKind {
    pub fn name(self) -> &'static str {
        match self {
            BasicKind::Denoise => "denoise",
            BasicKind::Sharpen => "sharpen",
        }
    }

    pub fn filter_type(self) -> FilterType {
        match self {
            BasicKind::Denoise => FilterType::NoiseReduction,
            BasicKind::Sharpen => FilterType::Sharpening,
        }
    }

    /// Variable holding the strength, `<name>-sigma`.
    pub fn parameter(self) -> &'static str {
        match self {
            BasicKind::Denoise => "denoise-sigma",
            BasicKind::Sharpen => "sharpen-sigma",
        }
    }

    fn logical_range(self) -> Range {
        Range::fixed(0.0, 2.0)
    }

    fn default_sigma(self) -> f32 {
        match self {
            BasicKind::Denoise => 1.0,
            BasicKind::Sharpen => 0.05,
        }
    }
}

/// Live strength of a basic filter.
pub struct BasicParams {
    kind: BasicKind,
    value: SigmaCell,
    driver: TargetRange,
}

impl BasicParams {
    pub fn kind(&self) -> BasicKind {
        self.kind
    }

    pub fn driver_value(&self) -> f32 {
        self.value.load()
    }

    pub fn driver_range(&self) -> TargetRange {
        self.driver
    }

    fn validate(&self, name: &str, sigma: f32) -> Result<(), FilterError> {
        if name != self.kind.parameter() {
            return Err(FilterError::UnknownParameter(name.to_string()));
        }
        if !sigma.is_finite() {
            return Err(FilterError::InvalidValue {
                name: name.to_string(),
                value: sigma,
            });
        }
        Ok(())
    }

    pub fn apply(&self, name: &str, sigma: f32) -> Result<(), FilterError> {
        self.validate(name, sigma)?;
        self.value.store(driver_sigma(
            name,
            sigma,
            self.kind.logical_range(),
            self.driver,
            false,
        ));
        Ok(())
    }
}

impl VarListener for BasicParams {
    fn check(&self, name: &str, value: f32) -> Result<(), FilterError> {
        self.validate(name, value)
    }

    fn update(&self, name: &str, value: f32) {
        if let Err(e) = self.apply(name, value) {
            tracing::warn!("{}: {}", self.kind.name(), e);
        }
    }
}

impl SubmitHooks for &BasicParams {
    fn update_parameters(&self, params: &mut [FilterParam]) {
        if let Some(FilterParam::Value { value, .. }) = params.first_mut() {
            *value = self.value.load();
        }
    }
}

struct BasicSetup<'a> {
    kind: BasicKind,
    vars: &'a VarStore,
    params: Option<Arc<BasicParams>>,
}

impl FilterSetup for BasicSetup<'_> {
    fn filter_type(&self) -> FilterType {
        self.kind.filter_type()
    }

    fn init_params(
        &mut self,
        session: &dyn VaSession,
        context: ContextId,
    ) -> Result<Vec<FilterParam>, FilterError> {
        let filter = self.kind.filter_type();
        let range = match session.query_filter_caps(context, filter)? {
            FilterCaps::Range(ranges) => ranges.first().copied(),
            _ => None,
        }
        .ok_or(FilterError::NoCapabilities(filter))?;

        let driver = TargetRange::from_driver(&range).ok_or_else(|| FilterError::InvalidRange {
            name: self.kind.parameter().to_string(),
            min: range.min,
            max: range.max,
        })?;

        let sigma = self
            .vars
            .float(self.kind.parameter())
            .unwrap_or(self.kind.default_sigma());
        let value = driver_sigma(
            self.kind.parameter(),
            sigma,
            self.kind.logical_range(),
            driver,
            false,
        );

        self.params = Some(Arc::new(BasicParams {
            kind: self.kind,
            value: SigmaCell::new(value),
            driver,
        }));
        Ok(vec![FilterParam::Value { filter, value }])
    }
}

/// Denoise or sharpen filter instance.
pub struct BasicFilter {
    _subscription: Subscription,
    params: Arc<BasicParams>,
    resources: FilterResources,
}

impl BasicFilter {
    pub fn open(kind: BasicKind, ctx: &FilterContext<'_>) -> Result<Self, FilterError> {
        let mut setup = BasicSetup {
            kind,
            vars: &ctx.vars,
            params: None,
        };
        let resources = FilterResources::open(ctx.source, &ctx.fmt_in, &ctx.fmt_out, &mut setup)?;
        let params = setup
            .params
            .ok_or(FilterError::NoCapabilities(kind.filter_type()))?;

        let subscription = ctx.vars.subscribe(kind.parameter(), params.clone());

        tracing::info!(
            "{}: driver range [{}, {}], {}x{}",
            kind.name(),
            params.driver.min,
            params.driver.max,
            ctx.fmt_out.width,
            ctx.fmt_out.height
        );

        Ok(Self {
            _subscription: subscription,
            params,
            resources,
        })
    }

    pub fn filter(&mut self, input: Picture) -> Result<Picture, SubmitError> {
        let mut hooks = self.params.as_ref();
        submit(&self.resources, &input, &mut hooks)
    }

    pub fn params(&self) -> &BasicParams {
        &self.params
    }

    pub fn resources(&self) -> &FilterResources {
        &self.resources
    }
}
