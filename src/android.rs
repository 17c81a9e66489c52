//! JNI bindings for Android.
//!
//! These functions are called from Kotlin via the JNI bridge.

use jni::objects::{JClass, JString};
use jni::sys::jstring;
use jni::JNIEnv;

use crate::render_json;

/// Render a JSON request and return the JSON reply.
///
/// Called from Kotlin as:
///   external fun renderJson(request: String): String?
#[no_mangle]
pub extern "system" fn Java_com_tabscore_app_TabScoreLib_renderJson(
    mut env: JNIEnv,
    _class: JClass,
    request: JString,
) -> jstring {
    let body: String = match env.get_string(&request) {
        Ok(s) => s.into(),
        Err(_) => return std::ptr::null_mut(),
    };

    match env.new_string(render_json(&body)) {
        Ok(js) => js.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}
