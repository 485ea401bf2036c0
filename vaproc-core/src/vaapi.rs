//! # VA-API Backend (Linux)
//!
//! [`VaSession`] over the real driver. libva is loaded at runtime, so the
//! crate has no link-time dependency on it.
//!
//! ```text
//! libva.so.2 + libva-drm.so.2 ─► /dev/dri/renderD* ─► vaGetDisplayDRM
//!     ─► vaInitialize ─► VaapiDisplay (shared by every filter)
//! ```
//!
//! Filter and pipeline buffers keep their Rust-side contents in a registry
//! keyed by buffer id. Mapping a buffer hands those contents to the caller
//! and writes the C layout back. The reference and filter id arrays a
//! pipeline buffer points at live in the registry until the buffer is
//! destroyed.

use libloading::Library;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::mem;
use std::os::raw::{c_char, c_int, c_uint};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Weak};

use crate::frame::{Chroma, VideoFormat};
use crate::va::{
    BufferId, ColorBalanceAttrib, ColorBalanceCap, ConfigId, ContextId, DeinterlaceAlgorithm,
    FilterCaps, FilterParam, FilterType, PipelineCaps, PipelineParams, SessionSource, SurfaceId,
    VaError, VaSession, ValueRange,
};

// ============================================================================
// VA-API Types (va/va.h, va/va_vpp.h)
// ============================================================================

type VAStatus = c_int;
type VADisplay = *mut c_void;
type VAConfigID = c_uint;
type VAContextID = c_uint;
type VASurfaceID = c_uint;
type VABufferID = c_uint;

const VA_STATUS_SUCCESS: VAStatus = 0;

const VA_PROFILE_NONE: c_int = -1;
const VA_ENTRYPOINT_VIDEO_PROC: c_int = 10;
const VA_CONFIG_ATTRIB_RT_FORMAT: c_int = 0;

const VA_RT_FORMAT_YUV420: c_uint = 0x0000_0001;
const VA_RT_FORMAT_YUV420_10: c_uint = 0x0000_0100;

const VA_FOURCC_NV12: u32 = 0x3231_564E;
const VA_FOURCC_P010: u32 = 0x3031_3050;

const VA_SURFACE_ATTRIB_PIXEL_FORMAT: c_int = 1;
const VA_SURFACE_ATTRIB_SETTABLE: c_uint = 0x0000_0002;
const VA_GENERIC_VALUE_TYPE_INTEGER: c_int = 1;

const VA_PROC_PIPELINE_PARAMETER_BUFFER_TYPE: c_int = 41;
const VA_PROC_FILTER_PARAMETER_BUFFER_TYPE: c_int = 42;

// Capacities handed to the query calls.
const MAX_FILTERS: usize = 32;
const MAX_COLOR_BALANCE_CAPS: usize = 16;
const MAX_DEINTERLACING_CAPS: usize = 16;

pub const DEFAULT_RENDER_NODE: &str = "/dev/dri/renderD128";

const LIBVA: &str = "libva.so.2";
const LIBVA_DRM: &str = "libva-drm.so.2";

// ============================================================================
// VA-API Structures
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VAConfigAttrib {
    attrib_type: c_int,
    value: c_uint,
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
union VAGenericValueUnion {
    i: c_int,
    f: f32,
    p: *mut c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct VAGenericValue {
    value_type: c_int,
    value: VAGenericValueUnion,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct VASurfaceAttrib {
    attrib_type: c_int,
    flags: c_uint,
    value: VAGenericValue,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VAProcFilterValueRange {
    min_value: f32,
    max_value: f32,
    default_value: f32,
    step: f32,
    va_reserved: [u32; 4],
}

impl From<VAProcFilterValueRange> for ValueRange {
    fn from(r: VAProcFilterValueRange) -> Self {
        ValueRange {
            min: r.min_value,
            max: r.max_value,
            default: r.default_value,
            step: r.step,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VAProcFilterCap {
    range: VAProcFilterValueRange,
    va_reserved: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VAProcFilterCapColorBalance {
    balance_type: c_int,
    range: VAProcFilterValueRange,
    va_reserved: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VAProcFilterCapDeinterlacing {
    deinterlacing_type: c_int,
    va_reserved: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VAProcFilterParameterBuffer {
    filter_type: c_int,
    value: f32,
    va_reserved: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VAProcFilterParameterBufferColorBalance {
    filter_type: c_int,
    attrib: c_int,
    value: f32,
    va_reserved: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VAProcFilterParameterBufferDeinterlacing {
    filter_type: c_int,
    algorithm: c_int,
    flags: u32,
    va_reserved: [u32; 4],
}

/// Leading fields of VAProcPipelineCaps. The tail is left as raw storage
/// large enough for every libva 2.x layout; nothing in it is read.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct VAProcPipelineCaps {
    pipeline_flags: u32,
    filter_flags: u32,
    num_forward_references: u32,
    num_backward_references: u32,
    tail: [u64; 32],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
#[allow(dead_code)]
struct VAProcColorProperties {
    chroma_sample_location: u8,
    color_range: u8,
    colour_primaries: u8,
    transfer_characteristics: u8,
    matrix_coefficients: u8,
    reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct VAProcPipelineParameterBuffer {
    surface: VASurfaceID,
    surface_region: *const c_void,
    surface_color_standard: c_int,
    output_region: *const c_void,
    output_background_color: u32,
    output_color_standard: c_int,
    pipeline_flags: u32,
    filter_flags: u32,
    filters: *mut VABufferID,
    num_filters: u32,
    forward_references: *mut VASurfaceID,
    num_forward_references: u32,
    backward_references: *mut VASurfaceID,
    num_backward_references: u32,
    rotation_state: u32,
    blend_state: *const c_void,
    mirror_state: u32,
    additional_outputs: *mut VASurfaceID,
    num_additional_outputs: u32,
    input_surface_flag: u32,
    output_surface_flag: u32,
    input_color_properties: VAProcColorProperties,
    output_color_properties: VAProcColorProperties,
    processing_mode: u32,
    output_hdr_metadata: *mut c_void,
    va_reserved: [u32; 16],
}

// ============================================================================
// Function Types
// ============================================================================

type VaGetDisplayDrmFn = unsafe extern "C" fn(c_int) -> VADisplay;
type VaInitializeFn = unsafe extern "C" fn(VADisplay, *mut c_int, *mut c_int) -> VAStatus;
type VaTerminateFn = unsafe extern "C" fn(VADisplay) -> VAStatus;
type VaErrorStrFn = unsafe extern "C" fn(VAStatus) -> *const c_char;
type VaGetConfigAttributesFn =
    unsafe extern "C" fn(VADisplay, c_int, c_int, *mut VAConfigAttrib, c_int) -> VAStatus;
type VaCreateConfigFn = unsafe extern "C" fn(
    VADisplay,
    c_int,
    c_int,
    *mut VAConfigAttrib,
    c_int,
    *mut VAConfigID,
) -> VAStatus;
type VaDestroyConfigFn = unsafe extern "C" fn(VADisplay, VAConfigID) -> VAStatus;
type VaCreateSurfacesFn = unsafe extern "C" fn(
    VADisplay,
    c_uint,
    c_uint,
    c_uint,
    *mut VASurfaceID,
    c_uint,
    *mut VASurfaceAttrib,
    c_uint,
) -> VAStatus;
type VaDestroySurfacesFn = unsafe extern "C" fn(VADisplay, *mut VASurfaceID, c_int) -> VAStatus;
type VaCreateContextFn = unsafe extern "C" fn(
    VADisplay,
    VAConfigID,
    c_int,
    c_int,
    c_int,
    *mut VASurfaceID,
    c_int,
    *mut VAContextID,
) -> VAStatus;
type VaDestroyContextFn = unsafe extern "C" fn(VADisplay, VAContextID) -> VAStatus;
type VaCreateBufferFn = unsafe extern "C" fn(
    VADisplay,
    VAContextID,
    c_int,
    c_uint,
    c_uint,
    *mut c_void,
    *mut VABufferID,
) -> VAStatus;
type VaDestroyBufferFn = unsafe extern "C" fn(VADisplay, VABufferID) -> VAStatus;
type VaMapBufferFn = unsafe extern "C" fn(VADisplay, VABufferID, *mut *mut c_void) -> VAStatus;
type VaUnmapBufferFn = unsafe extern "C" fn(VADisplay, VABufferID) -> VAStatus;
type VaBeginPictureFn = unsafe extern "C" fn(VADisplay, VAContextID, VASurfaceID) -> VAStatus;
type VaRenderPictureFn =
    unsafe extern "C" fn(VADisplay, VAContextID, *mut VABufferID, c_int) -> VAStatus;
type VaEndPictureFn = unsafe extern "C" fn(VADisplay, VAContextID) -> VAStatus;
type VaQueryVideoProcFiltersFn =
    unsafe extern "C" fn(VADisplay, VAContextID, *mut c_int, *mut c_uint) -> VAStatus;
type VaQueryVideoProcFilterCapsFn =
    unsafe extern "C" fn(VADisplay, VAContextID, c_int, *mut c_void, *mut c_uint) -> VAStatus;
type VaQueryVideoProcPipelineCapsFn = unsafe extern "C" fn(
    VADisplay,
    VAContextID,
    *mut VABufferID,
    c_uint,
    *mut VAProcPipelineCaps,
) -> VAStatus;

// ============================================================================
// Loaded Functions Container
// ============================================================================

struct VaapiLibrary {
    _libva: Library,
    _libva_drm: Library,

    get_display_drm: VaGetDisplayDrmFn,
    initialize: VaInitializeFn,
    terminate: VaTerminateFn,
    error_str: VaErrorStrFn,
    get_config_attributes: VaGetConfigAttributesFn,
    create_config: VaCreateConfigFn,
    destroy_config: VaDestroyConfigFn,
    create_surfaces: VaCreateSurfacesFn,
    destroy_surfaces: VaDestroySurfacesFn,
    create_context: VaCreateContextFn,
    destroy_context: VaDestroyContextFn,
    create_buffer: VaCreateBufferFn,
    destroy_buffer: VaDestroyBufferFn,
    map_buffer: VaMapBufferFn,
    unmap_buffer: VaUnmapBufferFn,
    begin_picture: VaBeginPictureFn,
    render_picture: VaRenderPictureFn,
    end_picture: VaEndPictureFn,
    query_filters: VaQueryVideoProcFiltersFn,
    query_filter_caps: VaQueryVideoProcFilterCapsFn,
    query_pipeline_caps: VaQueryVideoProcPipelineCapsFn,
}

unsafe impl Send for VaapiLibrary {}
unsafe impl Sync for VaapiLibrary {}

static VAAPI_LIB: OnceCell<Result<VaapiLibrary, String>> = OnceCell::new();

fn library() -> Result<&'static VaapiLibrary, VaError> {
    VAAPI_LIB
        .get_or_init(|| {
            let lib = unsafe { VaapiLibrary::load() };
            match &lib {
                Ok(_) => tracing::info!("VAAPI library loaded"),
                Err(e) => tracing::warn!("Failed to load VAAPI: {}", e),
            }
            lib
        })
        .as_ref()
        .map_err(|e| VaError::LibraryNotFound(e.clone()))
}

impl VaapiLibrary {
    unsafe fn load() -> Result<Self, String> {
        let libva = Library::new(LIBVA).map_err(|e| format!("{}: {}", LIBVA, e))?;
        let libva_drm = Library::new(LIBVA_DRM).map_err(|e| format!("{}: {}", LIBVA_DRM, e))?;

        macro_rules! sym {
            ($lib:expr, $name:literal) => {
                *$lib
                    .get(concat!($name, "\0").as_bytes())
                    .map_err(|e| format!("{}: {}", $name, e))?
            };
        }

        Ok(Self {
            get_display_drm: sym!(libva_drm, "vaGetDisplayDRM"),
            initialize: sym!(libva, "vaInitialize"),
            terminate: sym!(libva, "vaTerminate"),
            error_str: sym!(libva, "vaErrorStr"),
            get_config_attributes: sym!(libva, "vaGetConfigAttributes"),
            create_config: sym!(libva, "vaCreateConfig"),
            destroy_config: sym!(libva, "vaDestroyConfig"),
            create_surfaces: sym!(libva, "vaCreateSurfaces"),
            destroy_surfaces: sym!(libva, "vaDestroySurfaces"),
            create_context: sym!(libva, "vaCreateContext"),
            destroy_context: sym!(libva, "vaDestroyContext"),
            create_buffer: sym!(libva, "vaCreateBuffer"),
            destroy_buffer: sym!(libva, "vaDestroyBuffer"),
            map_buffer: sym!(libva, "vaMapBuffer"),
            unmap_buffer: sym!(libva, "vaUnmapBuffer"),
            begin_picture: sym!(libva, "vaBeginPicture"),
            render_picture: sym!(libva, "vaRenderPicture"),
            end_picture: sym!(libva, "vaEndPicture"),
            query_filters: sym!(libva, "vaQueryVideoProcFilters"),
            query_filter_caps: sym!(libva, "vaQueryVideoProcFilterCaps"),
            query_pipeline_caps: sym!(libva, "vaQueryVideoProcPipelineCaps"),
            _libva: libva,
            _libva_drm: libva_drm,
        })
    }

    fn error_string(&self, status: VAStatus) -> String {
        unsafe {
            let msg = (self.error_str)(status);
            if msg.is_null() {
                return format!("status {}", status);
            }
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

/// Render nodes present on this machine.
pub fn render_nodes() -> Vec<PathBuf> {
    (128..136)
        .map(|i| PathBuf::from(format!("/dev/dri/renderD{}", i)))
        .filter(|p| p.exists())
        .collect()
}

// ============================================================================
// Display
// ============================================================================

enum BufferSlot {
    Filter {
        filter: FilterType,
        params: Vec<FilterParam>,
    },
    Pipeline(Box<PipelineStorage>),
}

/// Arrays a pipeline buffer points at. Kept alive until the buffer is
/// destroyed.
#[derive(Default)]
struct PipelineStorage {
    params: PipelineParams,
    filters: Vec<VABufferID>,
    forward: Vec<VASurfaceID>,
    backward: Vec<VASurfaceID>,
}

/// An initialized VA display on a DRM render node.
pub struct VaapiDisplay {
    lib: &'static VaapiLibrary,
    display: VADisplay,
    drm_fd: c_int,
    version: (i32, i32),
    device: PathBuf,
    buffers: Mutex<HashMap<BufferId, BufferSlot>>,
}

// The VA display handle is usable from any thread; buffer bookkeeping is
// behind the mutex.
unsafe impl Send for VaapiDisplay {}
unsafe impl Sync for VaapiDisplay {}

impl VaapiDisplay {
    pub fn open(device: &Path) -> Result<Self, VaError> {
        let lib = library()?;
        let path = CString::new(device.as_os_str().as_bytes())
            .map_err(|_| VaError::NoDisplay(format!("bad device path {}", device.display())))?;

        unsafe {
            let drm_fd = libc::open(path.as_ptr(), libc::O_RDWR);
            if drm_fd < 0 {
                return Err(VaError::NoDisplay(format!(
                    "cannot open {}",
                    device.display()
                )));
            }

            let display = (lib.get_display_drm)(drm_fd);
            if display.is_null() {
                libc::close(drm_fd);
                return Err(VaError::NoDisplay(format!(
                    "no VA display on {}",
                    device.display()
                )));
            }

            let mut major = 0;
            let mut minor = 0;
            let status = (lib.initialize)(display, &mut major, &mut minor);
            if status != VA_STATUS_SUCCESS {
                (lib.terminate)(display);
                libc::close(drm_fd);
                return Err(VaError::Call {
                    call: "vaInitialize",
                    status,
                    message: lib.error_string(status),
                });
            }

            tracing::info!("VA-API {}.{} on {}", major, minor, device.display());

            Ok(Self {
                lib,
                display,
                drm_fd,
                version: (major, minor),
                device: device.to_path_buf(),
                buffers: Mutex::new(HashMap::new()),
            })
        }
    }

    pub fn version(&self) -> (i32, i32) {
        self.version
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    fn check(&self, call: &'static str, status: VAStatus) -> Result<(), VaError> {
        if status == VA_STATUS_SUCCESS {
            Ok(())
        } else {
            Err(VaError::Call {
                call,
                status,
                message: self.lib.error_string(status),
            })
        }
    }

    fn warn_on_failure(&self, call: &'static str, status: VAStatus) {
        if let Err(e) = self.check(call, status) {
            tracing::warn!("{}", e);
        }
    }

    /// Create a buffer holding `data` (`data.len()` elements of `T`).
    fn create_buffer<T>(
        &self,
        context: ContextId,
        buffer_type: c_int,
        data: &mut [T],
    ) -> Result<BufferId, VaError> {
        let mut id: VABufferID = BufferId::INVALID.0;
        let status = unsafe {
            (self.lib.create_buffer)(
                self.display,
                context.0,
                buffer_type,
                mem::size_of::<T>() as c_uint,
                data.len() as c_uint,
                data.as_mut_ptr() as *mut c_void,
                &mut id,
            )
        };
        self.check("vaCreateBuffer", status)?;
        Ok(BufferId(id))
    }

    /// Map `buffer`, run `write` on the mapping, unmap.
    fn with_mapping(
        &self,
        buffer: BufferId,
        write: impl FnOnce(*mut c_void),
    ) -> Result<(), VaError> {
        let mut data: *mut c_void = ptr::null_mut();
        let status = unsafe { (self.lib.map_buffer)(self.display, buffer.0, &mut data) };
        self.check("vaMapBuffer", status)?;
        if !data.is_null() {
            write(data);
        }
        let status = unsafe { (self.lib.unmap_buffer)(self.display, buffer.0) };
        self.check("vaUnmapBuffer", status)
    }

    fn query_caps<T: Default + Copy>(
        &self,
        context: ContextId,
        filter: FilterType,
        capacity: usize,
    ) -> Result<Vec<T>, VaError> {
        let mut caps = vec![T::default(); capacity];
        let mut num = capacity as c_uint;
        let status = unsafe {
            (self.lib.query_filter_caps)(
                self.display,
                context.0,
                filter.to_va() as c_int,
                caps.as_mut_ptr() as *mut c_void,
                &mut num,
            )
        };
        self.check("vaQueryVideoProcFilterCaps", status)?;
        caps.truncate((num as usize).min(capacity));
        Ok(caps)
    }
}

fn write_filter_params(data: *mut c_void, filter: FilterType, params: &[FilterParam]) {
    unsafe {
        match filter {
            FilterType::ColorBalance => {
                let elems = std::slice::from_raw_parts_mut(
                    data as *mut VAProcFilterParameterBufferColorBalance,
                    params.len(),
                );
                for (elem, param) in elems.iter_mut().zip(params) {
                    *elem = encode_color_balance(param);
                }
            }
            FilterType::Deinterlacing => {
                let elems = std::slice::from_raw_parts_mut(
                    data as *mut VAProcFilterParameterBufferDeinterlacing,
                    params.len(),
                );
                for (elem, param) in elems.iter_mut().zip(params) {
                    *elem = encode_deinterlacing(param);
                }
            }
            FilterType::NoiseReduction | FilterType::Sharpening => {
                let elems = std::slice::from_raw_parts_mut(
                    data as *mut VAProcFilterParameterBuffer,
                    params.len(),
                );
                for (elem, param) in elems.iter_mut().zip(params) {
                    *elem = encode_value(filter, param);
                }
            }
        }
    }
}

fn encode_value(filter: FilterType, param: &FilterParam) -> VAProcFilterParameterBuffer {
    let value = match param {
        FilterParam::Value { value, .. } => *value,
        _ => 0.0,
    };
    VAProcFilterParameterBuffer {
        filter_type: filter.to_va() as c_int,
        value,
        ..Default::default()
    }
}

fn encode_color_balance(param: &FilterParam) -> VAProcFilterParameterBufferColorBalance {
    let (attrib, value) = match param {
        FilterParam::ColorBalance { attrib, value } => (attrib.to_va() as c_int, *value),
        _ => (0, 0.0),
    };
    VAProcFilterParameterBufferColorBalance {
        filter_type: FilterType::ColorBalance.to_va() as c_int,
        attrib,
        value,
        ..Default::default()
    }
}

fn encode_deinterlacing(param: &FilterParam) -> VAProcFilterParameterBufferDeinterlacing {
    let (algorithm, flags) = match param {
        FilterParam::Deinterlacing { algorithm, flags } => (algorithm.to_va() as c_int, *flags),
        _ => (0, 0),
    };
    VAProcFilterParameterBufferDeinterlacing {
        filter_type: FilterType::Deinterlacing.to_va() as c_int,
        algorithm,
        flags,
        ..Default::default()
    }
}

impl VaSession for VaapiDisplay {
    fn create_surfaces(
        &self,
        format: &VideoFormat,
        count: usize,
    ) -> Result<Vec<SurfaceId>, VaError> {
        let (rt_format, fourcc) = match format.chroma {
            Chroma::Vaapi420 | Chroma::Nv12 => (VA_RT_FORMAT_YUV420, VA_FOURCC_NV12),
            Chroma::Vaapi420_10 => (VA_RT_FORMAT_YUV420_10, VA_FOURCC_P010),
            Chroma::I420 => {
                return Err(VaError::Unsupported(format!(
                    "{} surfaces",
                    format.chroma.as_str()
                )))
            }
        };

        let mut attrib = VASurfaceAttrib {
            attrib_type: VA_SURFACE_ATTRIB_PIXEL_FORMAT,
            flags: VA_SURFACE_ATTRIB_SETTABLE,
            value: VAGenericValue {
                value_type: VA_GENERIC_VALUE_TYPE_INTEGER,
                value: VAGenericValueUnion { i: fourcc as c_int },
            },
        };
        let mut ids = vec![0 as VASurfaceID; count];
        let status = unsafe {
            (self.lib.create_surfaces)(
                self.display,
                rt_format,
                format.width,
                format.height,
                ids.as_mut_ptr(),
                count as c_uint,
                &mut attrib,
                1,
            )
        };
        self.check("vaCreateSurfaces", status)?;
        Ok(ids.into_iter().map(SurfaceId).collect())
    }

    fn destroy_surfaces(&self, surfaces: &[SurfaceId]) {
        let mut ids: Vec<VASurfaceID> = surfaces.iter().map(|s| s.0).collect();
        let status = unsafe {
            (self.lib.destroy_surfaces)(self.display, ids.as_mut_ptr(), ids.len() as c_int)
        };
        self.warn_on_failure("vaDestroySurfaces", status);
    }

    fn create_config(&self) -> Result<ConfigId, VaError> {
        let mut attrib = VAConfigAttrib {
            attrib_type: VA_CONFIG_ATTRIB_RT_FORMAT,
            value: 0,
        };
        let status = unsafe {
            (self.lib.get_config_attributes)(
                self.display,
                VA_PROFILE_NONE,
                VA_ENTRYPOINT_VIDEO_PROC,
                &mut attrib,
                1,
            )
        };
        self.check("vaGetConfigAttributes", status)?;
        if attrib.value & VA_RT_FORMAT_YUV420 == 0 {
            return Err(VaError::Unsupported(
                "video processing without YUV 4:2:0 render targets".into(),
            ));
        }

        let mut id: VAConfigID = ConfigId::INVALID.0;
        let status = unsafe {
            (self.lib.create_config)(
                self.display,
                VA_PROFILE_NONE,
                VA_ENTRYPOINT_VIDEO_PROC,
                ptr::null_mut(),
                0,
                &mut id,
            )
        };
        self.check("vaCreateConfig", status)?;
        Ok(ConfigId(id))
    }

    fn destroy_config(&self, config: ConfigId) {
        let status = unsafe { (self.lib.destroy_config)(self.display, config.0) };
        self.warn_on_failure("vaDestroyConfig", status);
    }

    fn create_context(
        &self,
        config: ConfigId,
        width: u32,
        height: u32,
        targets: &[SurfaceId],
    ) -> Result<ContextId, VaError> {
        let mut ids: Vec<VASurfaceID> = targets.iter().map(|s| s.0).collect();
        let mut id: VAContextID = ContextId::INVALID.0;
        let status = unsafe {
            (self.lib.create_context)(
                self.display,
                config.0,
                width as c_int,
                height as c_int,
                0,
                ids.as_mut_ptr(),
                ids.len() as c_int,
                &mut id,
            )
        };
        self.check("vaCreateContext", status)?;
        Ok(ContextId(id))
    }

    fn destroy_context(&self, context: ContextId) {
        let status = unsafe { (self.lib.destroy_context)(self.display, context.0) };
        self.warn_on_failure("vaDestroyContext", status);
    }

    fn query_filters(&self, context: ContextId) -> Result<Vec<FilterType>, VaError> {
        let mut filters = [0 as c_int; MAX_FILTERS];
        let mut num = MAX_FILTERS as c_uint;
        let status = unsafe {
            (self.lib.query_filters)(self.display, context.0, filters.as_mut_ptr(), &mut num)
        };
        self.check("vaQueryVideoProcFilters", status)?;
        Ok(filters[..(num as usize).min(MAX_FILTERS)]
            .iter()
            .filter_map(|&f| FilterType::from_va(f as u32))
            .collect())
    }

    fn query_filter_caps(
        &self,
        context: ContextId,
        filter: FilterType,
    ) -> Result<FilterCaps, VaError> {
        Ok(match filter {
            FilterType::NoiseReduction | FilterType::Sharpening => {
                let caps: Vec<VAProcFilterCap> = self.query_caps(context, filter, 1)?;
                FilterCaps::Range(caps.into_iter().map(|c| c.range.into()).collect())
            }
            FilterType::ColorBalance => {
                let caps: Vec<VAProcFilterCapColorBalance> =
                    self.query_caps(context, filter, MAX_COLOR_BALANCE_CAPS)?;
                FilterCaps::ColorBalance(
                    caps.into_iter()
                        .filter_map(|c| {
                            ColorBalanceAttrib::from_va(c.balance_type as u32).map(|attrib| {
                                ColorBalanceCap {
                                    attrib,
                                    range: c.range.into(),
                                }
                            })
                        })
                        .collect(),
                )
            }
            FilterType::Deinterlacing => {
                let caps: Vec<VAProcFilterCapDeinterlacing> =
                    self.query_caps(context, filter, MAX_DEINTERLACING_CAPS)?;
                FilterCaps::Deinterlacing(
                    caps.into_iter()
                        .filter_map(|c| DeinterlaceAlgorithm::from_va(c.deinterlacing_type as u32))
                        .collect(),
                )
            }
        })
    }

    fn query_pipeline_caps(
        &self,
        context: ContextId,
        filters: &[BufferId],
    ) -> Result<PipelineCaps, VaError> {
        let mut ids: Vec<VABufferID> = filters.iter().map(|b| b.0).collect();
        let mut caps: VAProcPipelineCaps = unsafe { mem::zeroed() };
        let status = unsafe {
            (self.lib.query_pipeline_caps)(
                self.display,
                context.0,
                ids.as_mut_ptr(),
                ids.len() as c_uint,
                &mut caps,
            )
        };
        self.check("vaQueryVideoProcPipelineCaps", status)?;
        Ok(PipelineCaps {
            pipeline_flags: caps.pipeline_flags,
            filter_flags: caps.filter_flags,
            num_forward_references: caps.num_forward_references,
            num_backward_references: caps.num_backward_references,
        })
    }

    fn create_filter_buffer(
        &self,
        context: ContextId,
        params: &[FilterParam],
    ) -> Result<BufferId, VaError> {
        let Some(first) = params.first() else {
            return Err(VaError::Unsupported("empty filter parameter buffer".into()));
        };
        let filter = first.filter_type();
        if params.iter().any(|p| p.filter_type() != filter) {
            return Err(VaError::Unsupported(
                "mixed filter types in one parameter buffer".into(),
            ));
        }

        let id = match filter {
            FilterType::ColorBalance => {
                let mut elems: Vec<_> = params.iter().map(encode_color_balance).collect();
                self.create_buffer(context, VA_PROC_FILTER_PARAMETER_BUFFER_TYPE, &mut elems)?
            }
            FilterType::Deinterlacing => {
                let mut elems: Vec<_> = params.iter().map(encode_deinterlacing).collect();
                self.create_buffer(context, VA_PROC_FILTER_PARAMETER_BUFFER_TYPE, &mut elems)?
            }
            FilterType::NoiseReduction | FilterType::Sharpening => {
                let mut elems: Vec<_> = params.iter().map(|p| encode_value(filter, p)).collect();
                self.create_buffer(context, VA_PROC_FILTER_PARAMETER_BUFFER_TYPE, &mut elems)?
            }
        };

        self.buffers.lock().insert(
            id,
            BufferSlot::Filter {
                filter,
                params: params.to_vec(),
            },
        );
        Ok(id)
    }

    fn create_pipeline_buffer(&self, context: ContextId) -> Result<BufferId, VaError> {
        let mut zeroed: [VAProcPipelineParameterBuffer; 1] = unsafe { mem::zeroed() };
        let id = self.create_buffer(context, VA_PROC_PIPELINE_PARAMETER_BUFFER_TYPE, &mut zeroed)?;
        self.buffers
            .lock()
            .insert(id, BufferSlot::Pipeline(Box::default()));
        Ok(id)
    }

    fn map_filter_buffer(
        &self,
        buffer: BufferId,
        update: &mut dyn FnMut(&mut [FilterParam]),
    ) -> Result<(), VaError> {
        let mut buffers = self.buffers.lock();
        let Some(BufferSlot::Filter { filter, params }) = buffers.get_mut(&buffer) else {
            return Err(VaError::UnknownBuffer(buffer));
        };
        let filter = *filter;
        self.with_mapping(buffer, |data| {
            update(params);
            write_filter_params(data, filter, params);
        })
    }

    fn map_pipeline_buffer(
        &self,
        buffer: BufferId,
        update: &mut dyn FnMut(&mut PipelineParams),
    ) -> Result<(), VaError> {
        let mut buffers = self.buffers.lock();
        let Some(BufferSlot::Pipeline(storage)) = buffers.get_mut(&buffer) else {
            return Err(VaError::UnknownBuffer(buffer));
        };
        self.with_mapping(buffer, |data| {
            update(&mut storage.params);
            storage.filters = storage.params.filters.iter().map(|b| b.0).collect();
            storage.forward = storage.params.forward_references.iter().map(|s| s.0).collect();
            storage.backward = storage.params.backward_references.iter().map(|s| s.0).collect();

            let mut args: VAProcPipelineParameterBuffer = unsafe { mem::zeroed() };
            args.surface = storage.params.surface.0;
            args.pipeline_flags = storage.params.pipeline_flags;
            args.filter_flags = storage.params.filter_flags;
            args.filters = storage.filters.as_mut_ptr();
            args.num_filters = storage.filters.len() as u32;
            args.forward_references = storage.forward.as_mut_ptr();
            args.num_forward_references = storage.forward.len() as u32;
            args.backward_references = storage.backward.as_mut_ptr();
            args.num_backward_references = storage.backward.len() as u32;
            unsafe { ptr::write(data as *mut VAProcPipelineParameterBuffer, args) };
        })
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        let status = unsafe { (self.lib.destroy_buffer)(self.display, buffer.0) };
        self.warn_on_failure("vaDestroyBuffer", status);
        self.buffers.lock().remove(&buffer);
    }

    fn begin_picture(&self, context: ContextId, target: SurfaceId) -> Result<(), VaError> {
        let status = unsafe { (self.lib.begin_picture)(self.display, context.0, target.0) };
        self.check("vaBeginPicture", status)
    }

    fn render_picture(&self, context: ContextId, buffers: &[BufferId]) -> Result<(), VaError> {
        let mut ids: Vec<VABufferID> = buffers.iter().map(|b| b.0).collect();
        let status = unsafe {
            (self.lib.render_picture)(self.display, context.0, ids.as_mut_ptr(), ids.len() as c_int)
        };
        self.check("vaRenderPicture", status)
    }

    fn end_picture(&self, context: ContextId) -> Result<(), VaError> {
        let status = unsafe { (self.lib.end_picture)(self.display, context.0) };
        self.check("vaEndPicture", status)
    }
}

impl Drop for VaapiDisplay {
    fn drop(&mut self) {
        unsafe {
            (self.lib.terminate)(self.display);
            libc::close(self.drm_fd);
        }
        tracing::debug!("VA display on {} terminated", self.device.display());
    }
}

// ============================================================================
// Shared Instance
// ============================================================================

/// Hands out one shared display per render node. The display is opened on
/// the first hold and terminated when the last holder drops it; a later
/// hold opens a fresh one.
pub struct VaapiInstance {
    device: PathBuf,
    display: Mutex<Weak<VaapiDisplay>>,
}

impl VaapiInstance {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            display: Mutex::new(Weak::new()),
        }
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.display.lock().strong_count() > 0
    }
}

impl SessionSource for VaapiInstance {
    fn hold(&self) -> Result<Arc<dyn VaSession>, VaError> {
        let mut current = self.display.lock();
        if let Some(display) = current.upgrade() {
            return Ok(display);
        }
        let display = Arc::new(VaapiDisplay::open(&self.device)?);
        *current = Arc::downgrade(&display);
        Ok(display)
    }
}

/// Instance on the first render node.
pub static DEFAULT_INSTANCE: Lazy<VaapiInstance> =
    Lazy::new(|| VaapiInstance::new(DEFAULT_RENDER_NODE));
