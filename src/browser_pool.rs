//! Browser pool management for concurrent Chrome instances
//!
//! A fixed set of rendering handles is launched when a crawl starts and torn
//! down when it ends. Handles are assigned round-robin without busy tracking:
//! when a batch is larger than the pool, several fetches share one browser,
//! each in its own page target. Chrome supports many concurrent targets per
//! browser process, which is what makes this sharing safe.

use crate::{create_browser_config_with_instance_id, user_data_dir, Config, CrawlError};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::Page;
use futures::future::join_all;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Launches and closes the rendering handles held by a [`ResourcePool`]
#[async_trait]
pub trait HandleLauncher: Send + Sync {
    type Handle: Send + Sync + 'static;

    async fn launch(&self, instance_id: usize) -> Result<Self::Handle, CrawlError>;

    async fn close(&self, handle: &Self::Handle) -> Result<(), CrawlError>;
}

/// Fixed-size, round-robin pool of rendering handles
pub struct ResourcePool<H> {
    handles: Vec<Arc<H>>,
    next: AtomicUsize,
}

impl<H: Send + Sync + 'static> ResourcePool<H> {
    /// Launch `size` handles sequentially.
    ///
    /// If any launch fails, the handles launched so far are closed and the
    /// launch error is returned.
    pub async fn initialize<L>(launcher: &L, size: usize) -> Result<Self, CrawlError>
    where
        L: HandleLauncher<Handle = H> + ?Sized,
    {
        if size == 0 {
            return Err(CrawlError::ConfigurationError(
                "Resource pool size must be greater than 0".to_string(),
            ));
        }

        let mut handles = Vec::with_capacity(size);
        for i in 0..size {
            match launcher.launch(i).await {
                Ok(handle) => {
                    handles.push(Arc::new(handle));
                    info!("Browser instance {} created successfully", i);
                }
                Err(e) => {
                    error!("Failed to create browser instance {}: {}", i, e);
                    let partial = Self {
                        handles,
                        next: AtomicUsize::new(0),
                    };
                    partial.shutdown(launcher).await;
                    return Err(e);
                }
            }
        }

        info!("Browser pool initialized with {} instances", handles.len());
        Ok(Self {
            handles,
            next: AtomicUsize::new(0),
        })
    }

    /// Next handle in round-robin order. Never blocks.
    pub fn acquire(&self) -> Arc<H> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        self.handles[index].clone()
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Close every handle concurrently and wait for all of them.
    ///
    /// Close failures are logged, not returned.
    pub async fn shutdown<L>(self, launcher: &L)
    where
        L: HandleLauncher<Handle = H> + ?Sized,
    {
        info!("Shutting down browser pool...");
        let results = join_all(self.handles.iter().map(|handle| launcher.close(handle))).await;
        for (i, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                warn!("Failed to close browser instance {}: {}", i, e);
            }
        }
        info!("Browser pool shutdown complete");
    }
}

/// A single headless Chrome process and its DevTools event loop
#[derive(Debug)]
pub struct BrowserInstance {
    /// Position of this instance in the pool
    pub id: usize,
    browser: Mutex<Browser>,
    /// Background task driving Chrome DevTools Protocol communication
    handler: tokio::task::JoinHandle<()>,
    /// When this instance was launched
    pub created_at: Instant,
    /// Chrome profile directory, removed on close
    pub user_data_dir: PathBuf,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
}

impl BrowserInstance {
    /// Open a blank page target. The lock is held only while the target is
    /// created, so concurrent fetches on one instance proceed in parallel.
    pub async fn open_page(&self) -> Result<Page, CrawlError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| CrawlError::PageError(e.to_string()))?;
        self.pages_opened.fetch_add(1, Ordering::Relaxed);
        Ok(page)
    }

    /// Close a page opened by [`open_page`](Self::open_page). Close failures
    /// are logged and otherwise ignored.
    pub async fn close_page(&self, page: Page) {
        if let Err(e) = page.close().await {
            debug!("Failed to close page on browser {}: {}", self.id, e);
        }
        self.pages_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pages_opened(&self) -> usize {
        self.pages_opened.load(Ordering::Relaxed)
    }

    /// Pages opened but not yet closed.
    pub fn open_pages(&self) -> usize {
        self.pages_opened()
            .saturating_sub(self.pages_closed.load(Ordering::Relaxed))
    }

    pub fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }
}

/// Delete a Chrome profile directory. A missing directory is not an error.
pub async fn remove_user_data_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!("Removed user data dir {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove user data dir {}: {}", path.display(), e),
    }
}

/// Launches headless Chrome instances for the pool
pub struct ChromeLauncher {
    config: Config,
}

impl ChromeLauncher {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl HandleLauncher for ChromeLauncher {
    type Handle = BrowserInstance;

    async fn launch(&self, instance_id: usize) -> Result<BrowserInstance, CrawlError> {
        let user_data_dir = user_data_dir(instance_id);
        std::fs::create_dir_all(&user_data_dir).map_err(|e| {
            CrawlError::BrowserLaunchFailed(format!("Failed to create user data dir: {e}"))
        })?;

        let browser_config = create_browser_config_with_instance_id(&self.config, instance_id)
            .map_err(|e| CrawlError::BrowserLaunchFailed(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| CrawlError::BrowserLaunchFailed(e.to_string()))?;

        // The handler is a stream that must be polled for the browser to make progress.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser {} handler error: {}", instance_id, e);
                }
            }
            tracing::debug!("Browser {} handler stream ended", instance_id);
        });

        Ok(BrowserInstance {
            id: instance_id,
            browser: Mutex::new(browser),
            handler: handler_task,
            created_at: Instant::now(),
            user_data_dir,
            pages_opened: AtomicUsize::new(0),
            pages_closed: AtomicUsize::new(0),
        })
    }

    async fn close(&self, handle: &BrowserInstance) -> Result<(), CrawlError> {
        let result = {
            let mut browser = handle.browser.lock().await;
            match browser.close().await {
                Ok(_) => browser.wait().await.map(|_| ()).map_err(CrawlError::from),
                Err(e) => Err(CrawlError::from(e)),
            }
        };
        handle.handler.abort();
        remove_user_data_dir(&handle.user_data_dir).await;
        info!(
            "Browser instance {} closed after {} pages ({:?} uptime)",
            handle.id,
            handle.pages_opened(),
            handle.created_at.elapsed()
        );
        result
    }
}
