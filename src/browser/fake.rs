//! In-memory [`BrowserLauncher`]/[`BrowserHandle`]/[`BrowserPage`] doubles
//! used by pool and collector tests. No real browser process involved.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{BrowserHandle, BrowserLauncher, BrowserPage};

/// Scripted response every page opened from a given launcher will produce.
/// Tests mutate this to exercise the collector's branches.
#[derive(Clone)]
pub struct PageScript {
    pub document_status: Option<u16>,
    pub html: String,
    pub screenshot: Vec<u8>,
    pub navigate_error: Option<String>,
    pub load_error: Option<String>,
}

impl Default for PageScript {
    fn default() -> Self {
        Self {
            document_status: Some(200),
            html: "<html><body>ok</body></html>".to_string(),
            screenshot: vec![0xFF, 0xD8, 0xFF],
            navigate_error: None,
            load_error: None,
        }
    }
}

pub struct FakeBrowserHandle {
    id: String,
    script: Arc<Mutex<PageScript>>,
    pub pages_opened: Arc<AtomicU64>,
    pub pages_closed: Arc<AtomicU64>,
}

#[async_trait]
impl BrowserHandle for FakeBrowserHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open_page(&self) -> anyhow::Result<Box<dyn BrowserPage>> {
        self.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBrowserPage {
            script: self.script.clone(),
            closed: Arc::new(AtomicBool::new(false)),
            pages_closed: self.pages_closed.clone(),
        }))
    }

    async fn close(&self) {}
}

pub struct FakeBrowserPage {
    script: Arc<Mutex<PageScript>>,
    closed: Arc<AtomicBool>,
    pages_closed: Arc<AtomicU64>,
}

#[async_trait]
impl BrowserPage for FakeBrowserPage {
    async fn set_viewport(&self, _width: u32, _height: u32, _user_agent: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn navigate(&self, _url: &str) -> anyhow::Result<()> {
        let script = self.script.lock().expect("lock poisoned").clone();
        if let Some(err) = script.navigate_error {
            anyhow::bail!(err);
        }
        Ok(())
    }

    async fn wait_for_load(&self) -> anyhow::Result<()> {
        let script = self.script.lock().expect("lock poisoned").clone();
        if let Some(err) = script.load_error {
            anyhow::bail!(err);
        }
        Ok(())
    }

    async fn document_response_status(&self) -> Option<u16> {
        self.script.lock().expect("lock poisoned").document_status
    }

    async fn content(&self) -> anyhow::Result<String> {
        Ok(self.script.lock().expect("lock poisoned").html.clone())
    }

    async fn screenshot_jpeg(&self, _quality: u8) -> anyhow::Result<Vec<u8>> {
        Ok(self.script.lock().expect("lock poisoned").screenshot.clone())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pages_closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeBrowserLauncher {
    next_id: AtomicU64,
    pub fail: AtomicBool,
    pub script: Arc<Mutex<PageScript>>,
    pub pages_opened: Arc<AtomicU64>,
    pub pages_closed: Arc<AtomicU64>,
}

impl FakeBrowserLauncher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            fail: AtomicBool::new(false),
            script: Arc::new(Mutex::new(PageScript::default())),
            pages_opened: Arc::new(AtomicU64::new(0)),
            pages_closed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_script(&self, script: PageScript) {
        *self.script.lock().expect("lock poisoned") = script;
    }
}

impl Default for FakeBrowserLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowserLauncher {
    async fn launch(&self) -> anyhow::Result<Arc<dyn BrowserHandle>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("fake browser launch failure");
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeBrowserHandle {
            id: format!("fake-browser-{id}"),
            script: self.script.clone(),
            pages_opened: self.pages_opened.clone(),
            pages_closed: self.pages_closed.clone(),
        }))
    }
}
