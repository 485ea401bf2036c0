//! # Adjust
//!
//! Hardware color balance: contrast, brightness, hue and saturation.
//!
//! Which channels exist is decided once at open from the driver's color
//! balance caps. The parameter buffer holds one element per available
//! channel, in channel order; unavailable channels never appear in it and
//! reject every later update.

use std::sync::Arc;

use crate::config::{Subscription, VarListener, VarStore};
use crate::filter::{FilterContext, FilterError};
use crate::frame::Picture;
use crate::lifecycle::{FilterResources, FilterSetup};
use crate::range::{driver_sigma, Range, SigmaCell, TargetRange};
use crate::submit::{submit, SubmitError, SubmitHooks};
use crate::va::{ColorBalanceAttrib, ContextId, FilterCaps, FilterParam, FilterType, VaSession};

struct Channel {
    name: &'static str,
    attrib: ColorBalanceAttrib,
    logical: Range,
    default: f32,
}

static CHANNELS: [Channel; 4] = [
    Channel {
        name: "contrast",
        attrib: ColorBalanceAttrib::Contrast,
        logical: Range::fixed(0.0, 2.0),
        default: 1.0,
    },
    Channel {
        name: "brightness",
        attrib: ColorBalanceAttrib::Brightness,
        logical: Range::fixed(0.0, 2.0),
        default: 1.0,
    },
    Channel {
        name: "hue",
        attrib: ColorBalanceAttrib::Hue,
        logical: Range::fixed(-180.0, 180.0),
        default: 0.0,
    },
    Channel {
        name: "saturation",
        attrib: ColorBalanceAttrib::Saturation,
        logical: Range::fixed(0.0, 3.0),
        default: 1.0,
    },
];

/// Parameter names the adjust filter listens to.
pub const ADJUST_PARAMETERS: [&str; 4] = ["contrast", "brightness", "hue", "saturation"];

struct Slot {
    value: SigmaCell,
    driver: Option<TargetRange>,
}

/// Live color balance values, one slot per channel.
pub struct AdjustParams {
    slots: [Slot; 4],
}

impl AdjustParams {
    fn from_caps(caps: &[crate::va::ColorBalanceCap], vars: &VarStore) -> Self {
        let slots = std::array::from_fn(|i| {
            let channel = &CHANNELS[i];
            let driver = caps
                .iter()
                .find(|cap| cap.attrib == channel.attrib)
                .and_then(|cap| {
                    let range = TargetRange::from_driver(&cap.range);
                    if range.is_none() {
                        tracing::warn!(
                            "{}: driver range [{}, {}] unusable, channel disabled",
                            channel.name,
                            cap.range.min,
                            cap.range.max
                        );
                    }
                    range
                });

            let sigma = vars.float(channel.name).unwrap_or(channel.default);
            let value = match driver {
                Some(driver) => driver_sigma(channel.name, sigma, channel.logical, driver, true),
                None => 0.0,
            };
            Slot {
                value: SigmaCell::new(value),
                driver,
            }
        });
        Self { slots }
    }

    pub fn is_available(&self, name: &str) -> bool {
        CHANNELS
            .iter()
            .position(|c| c.name == name)
            .is_some_and(|i| self.slots[i].driver.is_some())
    }

    pub fn available_count(&self) -> usize {
        self.slots.iter().filter(|s| s.driver.is_some()).count()
    }

    /// Current driver value of `name`, if the channel is available.
    pub fn driver_value(&self, name: &str) -> Option<f32> {
        let i = CHANNELS.iter().position(|c| c.name == name)?;
        self.slots[i].driver.map(|_| self.slots[i].value.load())
    }

    /// Channel index of `name` if an update to `sigma` would be taken.
    fn validate(&self, name: &str, sigma: f32) -> Result<usize, FilterError> {
        let i = CHANNELS
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| FilterError::UnknownParameter(name.to_string()))?;
        if self.slots[i].driver.is_none() {
            return Err(FilterError::ParameterUnavailable(name.to_string()));
        }
        if !sigma.is_finite() {
            return Err(FilterError::InvalidValue {
                name: name.to_string(),
                value: sigma,
            });
        }
        Ok(i)
    }

    /// Map a new logical `sigma` for `name` into its driver range and store
    /// it. Unknown and unavailable channels and non-finite values are
    /// rejected untouched.
    pub fn apply(&self, name: &str, sigma: f32) -> Result<(), FilterError> {
        let i = self.validate(name, sigma)?;
        let channel = &CHANNELS[i];
        if let Some(driver) = self.slots[i].driver {
            self.slots[i]
                .value
                .store(driver_sigma(channel.name, sigma, channel.logical, driver, true));
        }
        Ok(())
    }

    fn initial_params(&self) -> Vec<FilterParam> {
        CHANNELS
            .iter()
            .zip(&self.slots)
            .filter(|(_, slot)| slot.driver.is_some())
            .map(|(channel, slot)| FilterParam::ColorBalance {
                attrib: channel.attrib,
                value: slot.value.load(),
            })
            .collect()
    }
}

impl VarListener for AdjustParams {
    fn check(&self, name: &str, value: f32) -> Result<(), FilterError> {
        self.validate(name, value).map(|_| ())
    }

    fn update(&self, name: &str, value: f32) {
        if let Err(e) = self.apply(name, value) {
            tracing::warn!("adjust: {}", e);
        }
    }
}

// Shared by reference: the values are atomics, the hooks only read them.
impl SubmitHooks for &AdjustParams {
    fn update_parameters(&self, params: &mut [FilterParam]) {
        let available = self.slots.iter().filter(|s| s.driver.is_some());
        for (param, slot) in params.iter_mut().zip(available) {
            if let FilterParam::ColorBalance { value, .. } = param {
                *value = slot.value.load();
            }
        }
    }
}

struct AdjustSetup<'a> {
    vars: &'a VarStore,
    params: Option<Arc<AdjustParams>>,
}

impl FilterSetup for AdjustSetup<'_> {
    fn filter_type(&self) -> FilterType {
        FilterType::ColorBalance
    }

    fn init_params(
        &mut self,
        session: &dyn VaSession,
        context: ContextId,
    ) -> Result<Vec<FilterParam>, FilterError> {
        let caps = match session.query_filter_caps(context, FilterType::ColorBalance)? {
            FilterCaps::ColorBalance(caps) => caps,
            _ => return Err(FilterError::NoCapabilities(FilterType::ColorBalance)),
        };

        let params = AdjustParams::from_caps(&caps, self.vars);
        if params.available_count() == 0 {
            return Err(FilterError::NoCapabilities(FilterType::ColorBalance));
        }
        let initial = params.initial_params();
        self.params = Some(Arc::new(params));
        Ok(initial)
    }
}

/// Color balance filter instance.
pub struct Adjust {
    // Unsubscribe before the accelerator resources go away.
    _subscriptions: Vec<Subscription>,
    params: Arc<AdjustParams>,
    resources: FilterResources,
}

impl Adjust {
    pub fn open(ctx: &FilterContext<'_>) -> Result<Self, FilterError> {
        let mut setup = AdjustSetup {
            vars: &ctx.vars,
            params: None,
        };
        let resources = FilterResources::open(ctx.source, &ctx.fmt_in, &ctx.fmt_out, &mut setup)?;
        let params = setup
            .params
            .ok_or(FilterError::NoCapabilities(FilterType::ColorBalance))?;

        let subscriptions = ADJUST_PARAMETERS
            .iter()
            .map(|name| ctx.vars.subscribe(name, params.clone()))
            .collect();

        tracing::info!(
            "adjust: {}/4 channels, {}x{}",
            params.available_count(),
            ctx.fmt_out.width,
            ctx.fmt_out.height
        );

        Ok(Self {
            _subscriptions: subscriptions,
            params,
            resources,
        })
    }

    pub fn filter(&mut self, input: Picture) -> Result<Picture, SubmitError> {
        let mut hooks = self.params.as_ref();
        submit(&self.resources, &input, &mut hooks)
    }

    pub fn params(&self) -> &AdjustParams {
        &self.params
    }

    pub fn resources(&self) -> &FilterResources {
        &self.resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterSettings;
    use crate::frame::{Chroma, PictureMeta, VideoFormat};
    use crate::testing::FakeSession;
    use crate::va::{ColorBalanceCap, SessionSource, SurfaceId, ValueRange};

    fn caps(channels: &[(ColorBalanceAttrib, f32, f32)]) -> FilterCaps {
        FilterCaps::ColorBalance(
            channels
                .iter()
                .map(|&(attrib, min, max)| ColorBalanceCap {
                    attrib,
                    range: ValueRange::new(min, max),
                })
                .collect(),
        )
    }

    fn device(filter_caps: FilterCaps) -> FakeSession {
        FakeSession::new()
            .with_filters(&[FilterType::ColorBalance])
            .with_caps(FilterType::ColorBalance, filter_caps)
    }

    fn context<'a>(source: &'a dyn SessionSource, vars: Arc<VarStore>) -> FilterContext<'a> {
        let format = VideoFormat::new(Chroma::Vaapi420, 1920, 1080);
        FilterContext {
            source,
            fmt_in: format,
            fmt_out: format,
            vars,
        }
    }

    #[test]
    fn test_two_of_four_channels() {
        let fake = device(caps(&[
            (ColorBalanceAttrib::Hue, -180.0, 180.0),
            (ColorBalanceAttrib::Contrast, 0.0, 10.0),
        ]));
        let source = fake.session();
        let vars = VarStore::from_settings(&FilterSettings::default());
        let mut adjust = Adjust::open(&context(&source, Arc::clone(&vars))).unwrap();

        // Buffer holds the available channels only, in channel order.
        let buffer = fake
            .filter_params(adjust.resources().param_buffer_id())
            .unwrap();
        assert_eq!(buffer.len(), 2);
        assert!(matches!(
            buffer[0],
            FilterParam::ColorBalance {
                attrib: ColorBalanceAttrib::Contrast,
                ..
            }
        ));
        assert!(matches!(
            buffer[1],
            FilterParam::ColorBalance {
                attrib: ColorBalanceAttrib::Hue,
                ..
            }
        ));

        let err = vars.set_float("brightness", 1.5).unwrap_err();
        assert!(matches!(err, FilterError::ParameterUnavailable(_)));
        assert_eq!(vars.float("brightness"), Some(1.0));
        assert!(adjust.params().driver_value("brightness").is_none());

        vars.set_float("hue", 90.0).unwrap();
        let out = adjust
            .filter(Picture::new(SurfaceId(1), PictureMeta::default()))
            .unwrap();
        drop(out);

        let job = &fake.jobs()[0];
        assert_eq!(job.filters[0].len(), 2);
        match job.filters[0][1] {
            FilterParam::ColorBalance { value, .. } => assert!((value - 90.0).abs() < 1e-4),
            other => panic!("unexpected param {:?}", other),
        }
    }

    #[test]
    fn test_contrast_goes_through_visual_match() {
        let fake = device(caps(&[(ColorBalanceAttrib::Contrast, 0.0, 10.0)]));
        let source = fake.session();
        let vars = VarStore::from_settings(&FilterSettings::default());
        let adjust = Adjust::open(&context(&source, Arc::clone(&vars))).unwrap();

        // 1.0 -> 0.175 in [0, 0.35] -> 0.875 in [0, 10]
        let value = adjust.params().driver_value("contrast").unwrap();
        assert!((value - 0.875).abs() < 1e-4);

        vars.set_float("contrast", 5.0).unwrap();
        let value = adjust.params().driver_value("contrast").unwrap();
        assert!((value - 1.75).abs() < 1e-4);
    }

    #[test]
    fn test_unusable_driver_range_disables_channel() {
        let fake = device(caps(&[
            (ColorBalanceAttrib::Saturation, 3.0, 1.0),
            (ColorBalanceAttrib::Brightness, -100.0, 100.0),
        ]));
        let source = fake.session();
        let vars = VarStore::new();
        let adjust = Adjust::open(&context(&source, vars)).unwrap();
        assert_eq!(adjust.params().available_count(), 1);
        assert!(!adjust.params().is_available("saturation"));
        assert!(adjust.params().is_available("brightness"));
    }

    #[test]
    fn test_no_channels_fails_open() {
        let fake = device(caps(&[]));
        let source = fake.session();
        let result = Adjust::open(&context(&source, VarStore::new()));
        assert!(matches!(
            result,
            Err(FilterError::NoCapabilities(FilterType::ColorBalance))
        ));
    }

    #[test]
    fn test_unknown_name_rejected() {
        let fake = device(caps(&[(ColorBalanceAttrib::Hue, -180.0, 180.0)]));
        let source = fake.session();
        let adjust = Adjust::open(&context(&source, VarStore::new())).unwrap();
        assert!(matches!(
            adjust.params().apply("gamma", 1.0),
            Err(FilterError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_close_unsubscribes() {
        let fake = device(caps(&[(ColorBalanceAttrib::Hue, -180.0, 180.0)]));
        let source = fake.session();
        let vars = VarStore::new();
        let adjust = Adjust::open(&context(&source, Arc::clone(&vars))).unwrap();
        assert_eq!(vars.subscriber_count("hue"), 1);
        drop(adjust);
        for name in ADJUST_PARAMETERS {
            assert_eq!(vars.subscriber_count(name), 0);
        }
        vars.set_float("hue", 10.0).unwrap();
    }

    #[test]
    fn test_update_refused_by_one_filter_reaches_none() {
        let both = device(caps(&[
            (ColorBalanceAttrib::Brightness, -100.0, 100.0),
            (ColorBalanceAttrib::Hue, -180.0, 180.0),
        ]));
        let hue_only = device(caps(&[(ColorBalanceAttrib::Hue, -180.0, 180.0)]));
        let (source_a, source_b) = (both.session(), hue_only.session());
        let vars = VarStore::new();
        let a = Adjust::open(&context(&source_a, Arc::clone(&vars))).unwrap();
        let b = Adjust::open(&context(&source_b, Arc::clone(&vars))).unwrap();

        let before = a.params().driver_value("brightness").unwrap();
        assert!(before.abs() < 1e-4);

        assert!(matches!(
            vars.set_float("brightness", 2.0),
            Err(FilterError::ParameterUnavailable(_))
        ));
        assert_eq!(vars.float("brightness"), Some(1.0));
        assert_eq!(a.params().driver_value("brightness"), Some(before));
        assert!(b.params().driver_value("brightness").is_none());

        // Hue is shared by both and goes through to both.
        vars.set_float("hue", 30.0).unwrap();
        assert_eq!(a.params().driver_value("hue"), Some(30.0));
        assert_eq!(b.params().driver_value("hue"), Some(30.0));
    }

    #[test]
    fn test_non_finite_sigma_rejected() {
        let fake = device(caps(&[(ColorBalanceAttrib::Hue, -180.0, 180.0)]));
        let source = fake.session();
        let adjust = Adjust::open(&context(&source, VarStore::new())).unwrap();
        assert!(matches!(
            adjust.params().apply("hue", f32::NAN),
            Err(FilterError::InvalidValue { .. })
        ));
        assert_eq!(adjust.params().driver_value("hue"), Some(0.0));
    }

    #[test]
    fn test_update_from_another_thread_reaches_next_job() {
        let fake = device(caps(&[(ColorBalanceAttrib::Hue, -180.0, 180.0)]));
        let source = fake.session();
        let vars = VarStore::new();
        let mut adjust = Adjust::open(&context(&source, Arc::clone(&vars))).unwrap();

        let writer = Arc::clone(&vars);
        std::thread::spawn(move || writer.set_float("hue", 45.0).unwrap())
            .join()
            .unwrap();

        let out = adjust
            .filter(Picture::new(SurfaceId(1), PictureMeta::default()))
            .unwrap();
        drop(out);
        assert_eq!(
            fake.jobs()[0].filters[0],
            vec![FilterParam::ColorBalance {
                attrib: ColorBalanceAttrib::Hue,
                value: 45.0
            }]
        );
    }
}
