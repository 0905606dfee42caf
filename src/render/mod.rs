//! Rendering contract consumed by the surface paths of a pipeline.
//!
//! The engine never draws anything itself. It moves [`Surface`]s between
//! stages at connection time and calls into them at well defined points:
//! a decoder rendering into an encoder's input surface, an effector drawing
//! its input image onto the encoder surface, a capture source feeding an
//! encoder. A surface has exactly one owner at a time.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::av::Resolution;
use crate::error::{FlowError, Result};

/// Opaque handle a codec binds its output (or input) to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceTarget(u64);

impl SurfaceTarget {
    /// Wraps a backend handle.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The backend handle.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A drawable surface provided by the graphics backend.
pub trait Surface: Send {
    /// The handle codecs bind to.
    fn target(&self) -> SurfaceTarget;

    /// Size of the surface in pixels.
    fn resolution(&self) -> Resolution;

    /// Size of the images arriving on this surface.
    fn set_input_size(&mut self, resolution: Resolution);

    /// Blocks until the producer bound to this surface delivered an image.
    fn await_new_image(&mut self) -> Result<()>;

    /// Draws the last received image.
    fn draw_image(&mut self) -> Result<()>;

    /// Timestamp attached to the next swap.
    fn set_presentation_time(&mut self, pts: i64);

    /// Publishes the drawn image to whatever consumes this surface.
    fn swap_buffers(&mut self) -> Result<()>;

    /// Binds the surface to the calling thread.
    fn make_current(&mut self) -> Result<()> {
        Ok(())
    }

    /// Frees the surface.
    fn release(&mut self);
}

/// Identity of the rendering context a surface was created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderContext {
    id: u64,
}

impl RenderContext {
    /// Context with backend id `id`.
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    /// Backend id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Explicitly passed handle to the graphics backend.
pub trait RenderBackend: Send + Sync {
    /// Creates an offscreen surface stages can render into.
    fn create_surface(&self, resolution: Resolution) -> Result<Box<dyn Surface>>;

    /// Context the surfaces of this backend share.
    fn context(&self) -> RenderContext;
}

/// Shared backend handle.
pub type RenderHandle = Arc<dyn RenderBackend>;

/// Creates a linked surface request/provider pair.
pub fn surface_channel() -> (SurfaceProvider, SurfaceRequest) {
    let (tx, rx) = oneshot::channel();
    (SurfaceProvider { tx: Some(tx) }, SurfaceRequest { rx })
}

/// Resolves once the stage that owns a surface has created it.
#[derive(Debug)]
pub struct SurfaceRequest {
    rx: oneshot::Receiver<Result<RenderContext>>,
}

impl Future for SurfaceRequest {
    type Output = Result<RenderContext>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(FlowError::SurfaceCancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The answering half of a [`SurfaceRequest`].
#[derive(Debug)]
pub struct SurfaceProvider {
    tx: Option<oneshot::Sender<Result<RenderContext>>>,
}

impl SurfaceProvider {
    /// Answers the request. Later calls are ignored.
    pub fn provide(&mut self, context: RenderContext) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(context));
        }
    }

    /// Answers the request with an error.
    pub fn fail(&mut self, error: FlowError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(error));
        }
    }

    /// Whether the request was answered.
    pub fn is_answered(&self) -> bool {
        self.tx.is_none()
    }
}

static NEXT_SURFACE: AtomicU64 = AtomicU64::new(1);

/// Process-unique surface target, for backends that have no native handle.
pub fn next_surface_target() -> SurfaceTarget {
    SurfaceTarget(NEXT_SURFACE.fetch_add(1, Ordering::Relaxed))
}

/// Recording fakes for the rendering contract.
pub mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Everything a [`TestSurface`] was asked to do.
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct SurfaceLog {
        /// `await_new_image` calls.
        pub awaited: usize,
        /// `draw_image` calls.
        pub drawn: usize,
        /// Presentation times of every swap.
        pub swapped: Vec<i64>,
        /// Whether `release` ran.
        pub released: bool,
        /// Last `set_input_size` value.
        pub input_size: Option<Resolution>,
    }

    type SwapHook = Arc<dyn Fn(i64) + Send + Sync>;

    /// Surface that records calls; an optional hook observes every swap.
    pub struct TestSurface {
        target: SurfaceTarget,
        resolution: Resolution,
        pts: i64,
        log: Arc<Mutex<SurfaceLog>>,
        on_swap: Option<SwapHook>,
    }

    impl TestSurface {
        /// Surface of the given size with a fresh target.
        pub fn new(resolution: Resolution) -> Self {
            Self {
                target: next_surface_target(),
                resolution,
                pts: 0,
                log: Arc::new(Mutex::new(SurfaceLog::default())),
                on_swap: None,
            }
        }

        /// Calls `hook` with the presentation time on every swap.
        pub fn with_swap_hook(mut self, hook: impl Fn(i64) + Send + Sync + 'static) -> Self {
            self.on_swap = Some(Arc::new(hook));
            self
        }

        /// Shared call log.
        pub fn log(&self) -> Arc<Mutex<SurfaceLog>> {
            self.log.clone()
        }
    }

    impl Surface for TestSurface {
        fn target(&self) -> SurfaceTarget {
            self.target
        }

        fn resolution(&self) -> Resolution {
            self.resolution
        }

        fn set_input_size(&mut self, resolution: Resolution) {
            self.log.lock().input_size = Some(resolution);
        }

        fn await_new_image(&mut self) -> Result<()> {
            self.log.lock().awaited += 1;
            Ok(())
        }

        fn draw_image(&mut self) -> Result<()> {
            self.log.lock().drawn += 1;
            Ok(())
        }

        fn set_presentation_time(&mut self, pts: i64) {
            self.pts = pts;
        }

        fn swap_buffers(&mut self) -> Result<()> {
            self.log.lock().swapped.push(self.pts);
            if let Some(hook) = &self.on_swap {
                hook(self.pts);
            }
            Ok(())
        }

        fn release(&mut self) {
            self.log.lock().released = true;
        }
    }

    /// Backend handing out [`TestSurface`]s and remembering their logs.
    #[derive(Default)]
    pub struct TestRenderBackend {
        /// Logs of the surfaces created so far.
        pub surfaces: Mutex<Vec<Arc<Mutex<SurfaceLog>>>>,
    }

    impl TestRenderBackend {
        /// Backend with no surfaces.
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl RenderBackend for TestRenderBackend {
        fn create_surface(&self, resolution: Resolution) -> Result<Box<dyn Surface>> {
            let surface = TestSurface::new(resolution);
            self.surfaces.lock().push(surface.log());
            Ok(Box::new(surface))
        }

        fn context(&self) -> RenderContext {
            RenderContext::new(7)
        }
    }
}

#[cfg(test)]
mod handshake_tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_request_resolves_with_provided_context() {
        let (mut provider, request) = surface_channel();
        provider.provide(RenderContext::new(42));
        assert!(provider.is_answered());
        let context = request.await.unwrap();
        assert_eq!(context.id(), 42);
    }

    #[test]
    fn test_request_stays_pending_until_provided() {
        let (mut provider, request) = surface_channel();
        let mut request = task::spawn(request);
        assert_pending!(request.poll());
        provider.provide(RenderContext::new(1));
        assert!(request.is_woken());
        let context = assert_ready!(request.poll()).unwrap();
        assert_eq!(context.id(), 1);
    }

    #[tokio::test]
    async fn test_dropped_provider_cancels_request() {
        let (provider, request) = surface_channel();
        drop(provider);
        assert!(matches!(request.await, Err(FlowError::SurfaceCancelled)));
    }
}
