use crate::engine::SignatureEngine;
use crate::scanner::EngineLifecycle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const STOP_CHECK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    Rebuilt(u32),
    RebuildFailed(String),
}

/// Polls the database directory and rebuilds the engine when it changes.
pub struct DatabaseMonitor<E: SignatureEngine> {
    lifecycle: Arc<EngineLifecycle<E>>,
    interval: Duration,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stack_size: Option<usize>,
}

impl<E: SignatureEngine> DatabaseMonitor<E> {
    pub fn new(lifecycle: Arc<EngineLifecycle<E>>, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            stack_size: None,
        }
    }

    /// Stack size of the polling thread; the platform default otherwise.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn poll_once(&self) -> PollOutcome {
        poll(&self.lifecycle)
    }

    pub fn start(&mut self) -> Result<(), anyhow::Error> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(anyhow::anyhow!("病毒库监控已在运行中"));
        }

        let lifecycle = Arc::clone(&self.lifecycle);
        let running = Arc::clone(&self.running);
        let interval = self.interval;

        let mut builder = thread::Builder::new().name("database-monitor".to_string());
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        let handle = builder.spawn(move || {
                log::info!("病毒库监控线程已启动，轮询间隔: {:?}", interval);
                let mut last_poll = Instant::now();

                while running.load(Ordering::SeqCst) {
                    thread::sleep(STOP_CHECK.min(interval));
                    if last_poll.elapsed() < interval {
                        continue;
                    }
                    last_poll = Instant::now();
                    poll(&lifecycle);
                }

                log::info!("病毒库监控线程已停止");
            });

        match handle {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(anyhow::anyhow!("无法启动病毒库监控线程: {}", e))
            }
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("病毒库监控线程异常退出");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl<E: SignatureEngine> Drop for DatabaseMonitor<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll<E: SignatureEngine>(lifecycle: &EngineLifecycle<E>) -> PollOutcome {
    if !lifecycle.is_database_stale() {
        return PollOutcome::Unchanged;
    }

    log::info!("病毒库已更新，正在重建扫描引擎...");
    match lifecycle.rebuild() {
        Ok(sigs) => {
            log::info!("扫描引擎重建完成，签名数量: {}", sigs);
            PollOutcome::Rebuilt(sigs)
        }
        Err(e) => {
            log::error!("扫描引擎重建失败: {}", e);
            PollOutcome::RebuildFailed(e.to_string())
        }
    }
}
