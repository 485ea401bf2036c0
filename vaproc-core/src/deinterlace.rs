//! # Deinterlace
//!
//! Motion-aware deinterlacing over a sliding window of input frames.
//!
//! The window size comes from the driver's pipeline caps (backward and
//! forward reference counts). Nothing is output until the window first
//! fills; from then on every input yields the deinterlaced center frame,
//! delayed by `backward_count` frames.

use crate::filter::{FilterContext, FilterError};
use crate::frame::Picture;
use crate::history::{HistoryWindow, ReferenceLists};
use crate::lifecycle::{FilterResources, FilterSetup};
use crate::submit::{submit, SubmitError, SubmitHooks};
use crate::va::{
    ContextId, DeinterlaceAlgorithm, FilterCaps, FilterParam, FilterType, PipelineCaps,
    PipelineParams, VaSession, DEINTERLACING_BOTTOM_FIELD_FIRST,
};

/// Most reference frames accepted in either direction.
pub const MAX_REFERENCES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeinterlaceMode {
    pub name: &'static str,
    pub algorithm: DeinterlaceAlgorithm,
}

/// User-visible modes, in preference order. "x" names both motion aware
/// algorithms; the first one the driver offers wins.
pub static DEINTERLACE_MODES: [DeinterlaceMode; 4] = [
    DeinterlaceMode {
        name: "x",
        algorithm: DeinterlaceAlgorithm::MotionAdaptive,
    },
    DeinterlaceMode {
        name: "x",
        algorithm: DeinterlaceAlgorithm::MotionCompensated,
    },
    DeinterlaceMode {
        name: "bob",
        algorithm: DeinterlaceAlgorithm::Bob,
    },
    DeinterlaceMode {
        name: "mean",
        algorithm: DeinterlaceAlgorithm::Weave,
    },
];

/// Pick the algorithm for `requested` ("auto", `None` or a mode name) among
/// the algorithms the driver advertises.
pub fn select_algorithm(
    requested: Option<&str>,
    advertised: &[DeinterlaceAlgorithm],
) -> Result<DeinterlaceMode, FilterError> {
    let supported = |mode: &&DeinterlaceMode| advertised.contains(&mode.algorithm);

    let explicit = requested.filter(|name| *name != "auto");
    if let Some(name) = explicit {
        if let Some(mode) = DEINTERLACE_MODES
            .iter()
            .filter(|mode| mode.name == name)
            .find(supported)
        {
            tracing::debug!("using {} deinterlace method", mode.name);
            return Ok(*mode);
        }
    }

    let Some(mode) = DEINTERLACE_MODES.iter().find(supported) else {
        tracing::error!("no deinterlacing algorithm available");
        return Err(FilterError::NoDeinterlaceAlgorithm);
    };

    match explicit {
        Some(name) => tracing::info!(
            "{} algorithm not available, falling back to {} algorithm",
            name,
            mode.name
        ),
        None => tracing::debug!("using {} deinterlace method", mode.name),
    }
    Ok(*mode)
}

struct DeinterlaceSetup {
    requested: Option<String>,
    mode: Option<DeinterlaceMode>,
    references: (usize, usize),
}

impl FilterSetup for DeinterlaceSetup {
    fn filter_type(&self) -> FilterType {
        FilterType::Deinterlacing
    }

    fn init_params(
        &mut self,
        session: &dyn VaSession,
        context: ContextId,
    ) -> Result<Vec<FilterParam>, FilterError> {
        let advertised = match session.query_filter_caps(context, FilterType::Deinterlacing)? {
            FilterCaps::Deinterlacing(algorithms) => algorithms,
            _ => return Err(FilterError::NoCapabilities(FilterType::Deinterlacing)),
        };

        let mode = select_algorithm(self.requested.as_deref(), &advertised)?;
        self.mode = Some(mode);
        Ok(vec![FilterParam::Deinterlacing {
            algorithm: mode.algorithm,
            flags: 0,
        }])
    }

    fn use_pipeline_caps(&mut self, caps: &PipelineCaps) -> Result<(), FilterError> {
        let backward = caps.num_backward_references as usize;
        let forward = caps.num_forward_references as usize;
        if backward > MAX_REFERENCES || forward > MAX_REFERENCES {
            tracing::warn!(
                "deinterlace: driver asks for {} backward / {} forward references, at most {} supported",
                backward,
                forward,
                MAX_REFERENCES
            );
            return Err(FilterError::NoCapabilities(FilterType::Deinterlacing));
        }
        self.references = (backward, forward);
        Ok(())
    }
}

struct DeinterlaceHooks<'a> {
    history: &'a HistoryWindow<Picture>,
    refs: &'a mut ReferenceLists,
    top_field_first: bool,
}

impl SubmitHooks for DeinterlaceHooks<'_> {
    fn prepare_surfaces(&mut self) {
        self.refs.update(self.history);
    }

    fn update_pipeline_arguments(&self, args: &mut PipelineParams) {
        args.filter_flags = if self.top_field_first {
            0
        } else {
            DEINTERLACING_BOTTOM_FIELD_FIRST
        };
        args.backward_references = self.refs.backward.clone();
        args.forward_references = self.refs.forward.clone();
    }
}

/// Deinterlacer instance.
pub struct Deinterlace {
    history: HistoryWindow<Picture>,
    refs: ReferenceLists,
    mode: DeinterlaceMode,
    resources: FilterResources,
}

impl Deinterlace {
    pub fn open(ctx: &FilterContext<'_>) -> Result<Self, FilterError> {
        let mut setup = DeinterlaceSetup {
            requested: ctx.vars.string("deinterlace-mode"),
            mode: None,
            references: (0, 0),
        };
        let resources = FilterResources::open(ctx.source, &ctx.fmt_in, &ctx.fmt_out, &mut setup)?;
        let mode = setup.mode.ok_or(FilterError::NoDeinterlaceAlgorithm)?;
        let (backward, forward) = setup.references;

        tracing::info!(
            "deinterlace: {:?}, {} backward / {} forward references, {}x{}",
            mode.algorithm,
            backward,
            forward,
            ctx.fmt_out.width,
            ctx.fmt_out.height
        );

        Ok(Self {
            history: HistoryWindow::new(backward, forward),
            refs: ReferenceLists::new(backward, forward),
            mode,
            resources,
        })
    }

    /// Push `input` into the history. Returns the deinterlaced center frame
    /// once the window is full, `Ok(None)` while still buffering.
    pub fn filter(&mut self, input: Picture) -> Result<Option<Picture>, SubmitError> {
        if self.history.push(input).is_none() {
            return Ok(None);
        }
        let Some(center) = self.history.center() else {
            return Ok(None);
        };

        let mut hooks = DeinterlaceHooks {
            history: &self.history,
            refs: &mut self.refs,
            top_field_first: center.meta.top_field_first,
        };
        let mut output = submit(&self.resources, center, &mut hooks)?;
        output.meta.progressive = true;
        Ok(Some(output))
    }

    /// Release every held frame and start buffering again.
    pub fn flush(&mut self) {
        self.history.clear();
    }

    pub fn mode(&self) -> DeinterlaceMode {
        self.mode
    }

    pub fn history(&self) -> &HistoryWindow<Picture> {
        &self.history
    }

    pub fn resources(&self) -> &FilterResources {
        &self.resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VarStore;
    use crate::frame::{Chroma, PictureMeta, VideoFormat};
    use crate::pool::SurfacePool;
    use crate::testing::FakeSession;
    use crate::va::{SessionSource, SurfaceId};

    use DeinterlaceAlgorithm::*;

    fn format() -> VideoFormat {
        VideoFormat::new(Chroma::Vaapi420, 720, 576)
    }

    fn device(algorithms: &[DeinterlaceAlgorithm], backward: u32, forward: u32) -> FakeSession {
        FakeSession::new()
            .with_filters(&[FilterType::Deinterlacing])
            .with_caps(
                FilterType::Deinterlacing,
                FilterCaps::Deinterlacing(algorithms.to_vec()),
            )
            .with_pipeline_caps(PipelineCaps {
                num_backward_references: backward,
                num_forward_references: forward,
                ..Default::default()
            })
    }

    fn context<'a>(source: &'a dyn SessionSource, mode: Option<&str>) -> FilterContext<'a> {
        let vars = VarStore::new();
        if let Some(mode) = mode {
            vars.set_string("deinterlace-mode", mode).unwrap();
        }
        FilterContext {
            source,
            fmt_in: format(),
            fmt_out: format(),
            vars,
        }
    }

    fn field(id: u32, top_field_first: bool) -> Picture {
        Picture::new(
            SurfaceId(id),
            PictureMeta {
                pts_us: id as i64 * 40_000,
                top_field_first,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_auto_prefers_motion_adaptive() {
        let mode = select_algorithm(Some("auto"), &[Bob, MotionCompensated, MotionAdaptive]).unwrap();
        assert_eq!(mode.algorithm, MotionAdaptive);
        let mode = select_algorithm(None, &[Weave, Bob]).unwrap();
        assert_eq!(mode.algorithm, Bob);
    }

    #[test]
    fn test_explicit_mode_honored_or_fallback() {
        assert_eq!(
            select_algorithm(Some("bob"), &[MotionAdaptive, Bob]).unwrap().algorithm,
            Bob
        );
        // "x" resolves to whichever motion aware algorithm exists.
        assert_eq!(
            select_algorithm(Some("x"), &[MotionCompensated, Bob]).unwrap().algorithm,
            MotionCompensated
        );
        assert_eq!(
            select_algorithm(Some("mean"), &[Bob]).unwrap().algorithm,
            Bob
        );
        assert_eq!(
            select_algorithm(Some("linear"), &[Weave, Bob]).unwrap().algorithm,
            Bob
        );
    }

    #[test]
    fn test_nothing_advertised_fails() {
        assert!(matches!(
            select_algorithm(Some("auto"), &[]),
            Err(FilterError::NoDeinterlaceAlgorithm)
        ));

        let fake = device(&[], 1, 1);
        let source = fake.session();
        assert!(matches!(
            Deinterlace::open(&context(&source, None)),
            Err(FilterError::NoDeinterlaceAlgorithm)
        ));
        assert_eq!(fake.live_buffers(), 0);
    }

    #[test]
    fn test_oversized_reference_counts_fail_open() {
        let fake = device(&[Bob], u32::MAX, 1);
        let source = fake.session();
        assert!(matches!(
            Deinterlace::open(&context(&source, None)),
            Err(FilterError::NoCapabilities(FilterType::Deinterlacing))
        ));
        assert_eq!(fake.live_buffers(), 0);

        let fake = device(&[Bob], MAX_REFERENCES as u32, MAX_REFERENCES as u32);
        let source = fake.session();
        let deint = Deinterlace::open(&context(&source, None)).unwrap();
        assert_eq!(deint.history().capacity(), 2 * MAX_REFERENCES + 1);
    }

    #[test]
    fn test_five_frames_one_backward_one_forward() {
        let fake = device(&[Bob, MotionAdaptive], 1, 1);
        let source = fake.session();
        let mut deint = Deinterlace::open(&context(&source, Some("auto"))).unwrap();
        assert_eq!(deint.mode().algorithm, MotionAdaptive);

        // A..E = surfaces 1..5, alternating field order.
        assert!(deint.filter(field(1, true)).unwrap().is_none());
        assert!(deint.filter(field(2, true)).unwrap().is_none());

        let mut outputs = Vec::new();
        for (id, tff) in [(3, false), (4, true), (5, true)] {
            let out = deint.filter(field(id, tff)).unwrap().unwrap();
            assert!(out.meta.progressive);
            outputs.push(out.meta.pts_us);
        }
        // Outputs carry the center frames' timestamps: B, C, D.
        assert_eq!(outputs, vec![80_000, 120_000, 160_000]);

        let jobs = fake.jobs();
        let centers: Vec<_> = jobs.iter().map(|j| j.pipeline.surface).collect();
        assert_eq!(centers, vec![SurfaceId(2), SurfaceId(3), SurfaceId(4)]);

        let backward: Vec<_> = jobs
            .iter()
            .map(|j| j.pipeline.backward_references.clone())
            .collect();
        assert_eq!(
            backward,
            vec![vec![SurfaceId(3)], vec![SurfaceId(4)], vec![SurfaceId(5)]]
        );
        let forward: Vec<_> = jobs
            .iter()
            .map(|j| j.pipeline.forward_references.clone())
            .collect();
        assert_eq!(
            forward,
            vec![vec![SurfaceId(1)], vec![SurfaceId(2)], vec![SurfaceId(3)]]
        );

        // B is top field first, C bottom, D top.
        let flags: Vec<_> = jobs.iter().map(|j| j.pipeline.filter_flags).collect();
        assert_eq!(flags, vec![0, DEINTERLACING_BOTTOM_FIELD_FIRST, 0]);

        assert_eq!(
            jobs[0].filters[0],
            vec![FilterParam::Deinterlacing {
                algorithm: MotionAdaptive,
                flags: 0
            }]
        );
    }

    #[test]
    fn test_history_holds_and_releases_input_surfaces() {
        let fake = device(&[Bob], 1, 1);
        let source = fake.session();
        let mut deint = Deinterlace::open(&context(&source, Some("bob"))).unwrap();
        let decoder = SurfacePool::new(fake.session(), 4, &format()).unwrap();

        for held in [1, 2, 3, 3, 3] {
            let mut pic = decoder.try_acquire().unwrap();
            pic.meta.top_field_first = true;
            drop(deint.filter(pic).unwrap());
            assert_eq!(deint.history().len(), held);
            assert_eq!(decoder.stats().available, 4 - held);
        }

        deint.flush();
        assert!(deint.history().is_empty());
        assert_eq!(decoder.stats().available, 4);

        let pic = decoder.try_acquire().unwrap();
        assert!(deint.filter(pic).unwrap().is_none());
    }

    #[test]
    fn test_no_references_outputs_immediately() {
        let fake = device(&[Weave], 0, 0);
        let source = fake.session();
        let mut deint = Deinterlace::open(&context(&source, Some("mean"))).unwrap();

        let out = deint.filter(field(9, false)).unwrap().unwrap();
        assert!(out.meta.progressive);

        let job = &fake.jobs()[0];
        assert_eq!(job.pipeline.surface, SurfaceId(9));
        assert!(job.pipeline.backward_references.is_empty());
        assert!(job.pipeline.forward_references.is_empty());
    }

    #[test]
    fn test_exhausted_pool_keeps_history() {
        let fake = device(&[Bob], 0, 0);
        let source = fake.session();
        let mut deint = Deinterlace::open(&context(&source, None)).unwrap();

        let held: Vec<_> = (1..=3)
            .map(|i| deint.filter(field(i, true)).unwrap().unwrap())
            .collect();
        assert!(matches!(
            deint.filter(field(4, true)),
            Err(SubmitError::PoolExhausted)
        ));
        drop(held);
        assert!(deint.filter(field(5, true)).unwrap().is_some());
    }
}
