//! tabscore — notation layout, tablature mapping and render caching for
//! transcribed scores.
//!
//! Note data (measures of pitched, timed notes) goes in; paginated
//! notation and tablature come out as SVG, PNG and PDF. Identical
//! requests are served from a content-addressed cache.
//!
//! # Example
//! ```no_run
//! use tabscore::RenderRequestHandler;
//!
//! let handler = RenderRequestHandler::default();
//! let envelope = handler
//!     .handle_json(r#"{"noteData":{"measures":[{"index":0,"notes":[{"pitch":60,"duration":"whole"}]}]}}"#)
//!     .unwrap();
//! println!("pages: {}", envelope.metadata.page_count);
//! ```

pub mod cache;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod jobs;
pub mod layout;
pub mod model;
pub mod options;
pub mod render;
pub mod request;
pub mod routes;
pub mod storage;
pub mod tab;

#[cfg(target_os = "android")]
pub mod android;

use std::sync::{Arc, OnceLock};

use serde_json::json;

pub use cache::{CacheStore, Fingerprint, RenderCache};
pub use envelope::{Artifact, RenderMetadata, RenderResponseEnvelope, UnmappedNote};
pub use error::{HandlerError, RenderError, ValidationError};
pub use handler::{CacheCheck, HandlerConfig, PreparedRequest, RenderRequestHandler};
pub use jobs::{JobBoard, JobBoardConfig, JobEvent, JobQueue, JobStatus, PubSub};
pub use layout::{plan, LayoutPlan};
pub use model::*;
pub use options::{OutputFormat, RenderOptions};
pub use request::RawRequest;
pub use routes::{RouteResponse, Routes};
pub use tab::{TabMapper, TabPosition, Tuning};

static SHARED_HANDLER: OnceLock<Arc<RenderRequestHandler>> = OnceLock::new();

/// Process-wide handler used by the FFI and JNI bindings, so repeated
/// calls share one cache.
pub fn shared_handler() -> &'static Arc<RenderRequestHandler> {
    SHARED_HANDLER.get_or_init(|| Arc::new(RenderRequestHandler::default()))
}

/// Render a JSON request with the shared handler and return a JSON reply.
///
/// Success is the envelope summary; failure is
/// `{ "error", "status", "field"? }`.
pub fn render_json(body: &str) -> String {
    let reply = match shared_handler().handle_json(body) {
        Ok(envelope) => envelope.summary(),
        Err(e) => {
            let mut reply = json!({ "error": e.to_string(), "status": e.status_code() });
            if let Some(field) = e.field() {
                reply["field"] = json!(field);
            }
            reply
        }
    };
    reply.to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// C FFI — for iOS (static library) and Android (JNI)
// ═══════════════════════════════════════════════════════════════════════

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

/// Render a JSON request and return the JSON reply as a C string.
/// The caller must free the returned string with `tabscore_free_string`.
///
/// # Safety
/// `request_json` must be a valid null-terminated UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn tabscore_render_json(request_json: *const c_char) -> *mut c_char {
    if request_json.is_null() {
        return std::ptr::null_mut();
    }
    let c_str = unsafe { CStr::from_ptr(request_json) };
    let body = match c_str.to_str() {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };

    CString::new(render_json(body)).unwrap_or_default().into_raw()
}

/// Free a string previously returned by tabscore functions.
///
/// # Safety
/// `ptr` must be a string previously returned by a tabscore function, or null.
#[no_mangle]
pub unsafe extern "C" fn tabscore_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}
