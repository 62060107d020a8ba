use crate::browser::{Browser, BrowserObject};
use crate::engine::{Cookie, CookieStore};
use crate::error::{BridgeError, BridgeResult};
use std::rc::Rc;
use std::sync::Arc;

/// Cookie access for the profile a browser runs in
pub struct CookieManager {
    object: BrowserObject<dyn CookieStore>,
}

impl CookieManager {
    pub(crate) fn wrap(browser: &Arc<Browser>, store: Rc<dyn CookieStore>) -> BridgeResult<Arc<Self>> {
        Ok(Arc::new(Self {
            object: BrowserObject::new(browser, store)?,
        }))
    }

    /// Cookies that would be sent to `url`; an empty url lists every cookie
    pub fn cookies(&self, url: impl Into<String>) -> BridgeResult<Vec<Cookie>> {
        let url = url.into();
        self.object.deferred(move |store, completer| {
            store.cookies(&url, Box::new(move |result| completer.complete(result)))
        })
    }

    /// Non-blocking [`cookies`](Self::cookies); `callback` runs on the owner thread
    pub fn cookies_async<F>(&self, url: impl Into<String>, callback: F) -> BridgeResult<()>
    where
        F: FnOnce(BridgeResult<Vec<Cookie>>) + Send + 'static,
    {
        let url = url.into();
        self.object.deferred_async(
            move |store, reply| store.cookies(&url, Box::new(move |result| reply.send(result))),
            callback,
        )
    }

    /// Add or replace a cookie; waits so a rejected cookie is reported
    pub fn set_cookie(&self, cookie: Cookie) -> BridgeResult<()> {
        if cookie.name.is_empty() {
            return Err(BridgeError::invalid_argument("cookie name must not be empty"));
        }
        self.object.query_with(move |store| store.set_cookie(&cookie))
    }

    pub fn delete_cookies(&self, name: impl Into<String>, url: impl Into<String>) -> BridgeResult<()> {
        let name = name.into();
        let url = url.into();
        self.object
            .post("cookies.delete", move |store| store.delete_cookies(&name, &url))
    }

    pub fn delete_all(&self) -> BridgeResult<()> {
        self.object
            .post("cookies.delete_all", |store| store.delete_all_cookies())
    }
}

impl std::fmt::Debug for CookieManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieManager").finish_non_exhaustive()
    }
}
