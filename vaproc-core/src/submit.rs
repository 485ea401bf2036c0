//! # Frame Submission
//!
//! One input picture in, one processed picture out:
//!
//! ```text
//! acquire output ─► map params ─► update_parameters ─► unmap
//!     ─► begin(output) ─► prepare_surfaces
//!     ─► pipeline buffer: input surface, param buffer, fast flag,
//!        update_pipeline_arguments
//!     ─► render ─► end ─► output
//! ```
//!
//! Any failure drops the transient pipeline buffer and the output picture
//! (which returns its surface to the pool). The filter instance stays usable.

use thiserror::Error;

use crate::frame::Picture;
use crate::lifecycle::{FilterResources, Scoped};
use crate::va::{FilterParam, PipelineParams, VaError, PIPELINE_FAST};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Output surface pool exhausted")]
    PoolExhausted,
    #[error(transparent)]
    Va(#[from] VaError),
}

/// Per-filter customization points of a submission. All default to no-ops.
pub trait SubmitHooks {
    /// Rewrite the mapped parameter buffer with the current live values.
    fn update_parameters(&self, _params: &mut [FilterParam]) {}

    /// Runs after the job has begun, before the pipeline arguments are built.
    fn prepare_surfaces(&mut self) {}

    /// Add filter-specific pipeline arguments on top of the mandatory ones.
    fn update_pipeline_arguments(&self, _args: &mut PipelineParams) {}
}

/// Process `input` into a fresh picture from the instance's pool.
pub fn submit<H: SubmitHooks + ?Sized>(
    res: &FilterResources,
    input: &Picture,
    hooks: &mut H,
) -> Result<Picture, SubmitError> {
    let session = res.session();
    let context = res.context_id();

    let mut output = res.pool().try_acquire().ok_or(SubmitError::PoolExhausted)?;
    output.copy_properties(input);

    session.map_filter_buffer(res.param_buffer_id(), &mut |params| {
        hooks.update_parameters(params)
    })?;

    session.begin_picture(context, output.surface())?;

    hooks.prepare_surfaces();

    let pipeline = Scoped::pipeline_buffer(session, context)?;
    let pipeline_flags = if res.pipeline_fast() { PIPELINE_FAST } else { 0 };
    session.map_pipeline_buffer(pipeline.buffer_id(), &mut |args| {
        *args = PipelineParams {
            surface: input.surface(),
            filters: vec![res.param_buffer_id()],
            pipeline_flags,
            ..Default::default()
        };
        hooks.update_pipeline_arguments(args);
    })?;

    session.render_picture(context, &[pipeline.buffer_id()])?;
    session.end_picture(context)?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Chroma, PictureMeta, VideoFormat};
    use crate::testing::{FakeCall, FakeSession, StaticSetup};
    use crate::va::{FilterType, PipelineCaps, SurfaceId, ValueRange};

    fn open(fake: &FakeSession) -> FilterResources {
        let format = VideoFormat::new(Chroma::Vaapi420, 720, 480);
        FilterResources::open(&fake.session(), &format, &format, &mut StaticSetup).unwrap()
    }

    fn device() -> FakeSession {
        FakeSession::new()
            .with_filters(&[FilterType::NoiseReduction])
            .with_range_caps(FilterType::NoiseReduction, ValueRange::new(0.0, 64.0))
    }

    fn input(id: u32) -> Picture {
        Picture::new(
            SurfaceId(id),
            PictureMeta {
                pts_us: 1000 * id as i64,
                ..Default::default()
            },
        )
    }

    struct SetValue(f32);

    impl SubmitHooks for SetValue {
        fn update_parameters(&self, params: &mut [FilterParam]) {
            for param in params {
                if let FilterParam::Value { value, .. } = param {
                    *value = self.0;
                }
            }
        }
    }

    struct NoHooks;
    impl SubmitHooks for NoHooks {}

    #[test]
    fn test_job_references_input_and_param_buffer() {
        let fake = device().with_pipeline_caps(PipelineCaps {
            pipeline_flags: PIPELINE_FAST,
            ..Default::default()
        });
        let res = open(&fake);

        let out = submit(&res, &input(7), &mut SetValue(12.0)).unwrap();
        assert_eq!(out.meta.pts_us, 7000);
        assert!(out.is_pooled());

        let jobs = fake.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].target, out.surface());
        assert_eq!(jobs[0].pipeline.surface, SurfaceId(7));
        assert_eq!(jobs[0].pipeline.filters, vec![res.param_buffer_id()]);
        assert_eq!(jobs[0].pipeline.pipeline_flags, PIPELINE_FAST);
        // Parameters were written before the job was rendered.
        assert_eq!(
            jobs[0].filters,
            vec![vec![FilterParam::Value {
                filter: FilterType::NoiseReduction,
                value: 12.0
            }]]
        );
        // Only the persistent parameter buffer is left.
        assert_eq!(fake.live_buffers(), 1);
    }

    #[test]
    fn test_fourth_submission_with_three_held_outputs_fails() {
        let fake = device();
        let res = open(&fake);

        let held: Vec<_> = (1..=3)
            .map(|i| submit(&res, &input(i), &mut NoHooks).unwrap())
            .collect();
        assert!(matches!(
            submit(&res, &input(4), &mut NoHooks),
            Err(SubmitError::PoolExhausted)
        ));
        assert_eq!(fake.jobs().len(), 3);

        drop(held);
        assert!(submit(&res, &input(5), &mut NoHooks).is_ok());
    }

    #[test]
    fn test_failed_call_releases_transients_and_instance_recovers() {
        let calls = [
            FakeCall::MapFilterBuffer,
            FakeCall::BeginPicture,
            FakeCall::CreatePipelineBuffer,
            FakeCall::MapPipelineBuffer,
            FakeCall::RenderPicture,
            FakeCall::EndPicture,
        ];
        for call in calls {
            let fake = device();
            let res = open(&fake);

            fake.set_failing(call, true);
            let result = submit(&res, &input(1), &mut NoHooks);
            assert!(matches!(result, Err(SubmitError::Va(_))), "{:?}", call);
            assert_eq!(res.pool().stats().available, 3, "{:?}", call);
            assert_eq!(fake.live_buffers(), 1, "{:?}", call);

            fake.set_failing(call, false);
            assert!(submit(&res, &input(2), &mut NoHooks).is_ok(), "{:?}", call);
        }
    }

    #[test]
    fn test_default_pipeline_has_no_fast_flag() {
        let fake = device();
        let res = open(&fake);
        let _out = submit(&res, &input(3), &mut NoHooks).unwrap();
        assert_eq!(fake.jobs()[0].pipeline.pipeline_flags, 0);
        assert!(fake.jobs()[0].pipeline.forward_references.is_empty());
    }
}
