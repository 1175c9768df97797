use anyhow::Context;
use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::path::Path;

pub struct Logger;

impl Logger {
    /// Logs to stdout, and to a dated file when `log_dir` is given.
    pub fn init(log_dir: Option<&Path>, level: LevelFilter) -> Result<(), anyhow::Error> {
        let mut dispatcher = Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{}][{}][{}] {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(level)
            .chain(std::io::stdout());

        if let Some(dir) = log_dir {
            std::fs::create_dir_all(dir)?;
            let log_file = dir.join(format!(
                "virus-engine_{}.log",
                Local::now().format("%Y%m%d")
            ));
            dispatcher = dispatcher.chain(
                fern::log_file(&log_file)
                    .context(format!("无法创建日志文件: {:?}", log_file))?,
            );
            dispatcher.apply()?;
            log::info!("日志系统已初始化，输出文件: {:?}", log_file);
            return Ok(());
        }

        dispatcher.apply()?;
        Ok(())
    }

    pub fn get_level_filter(level: &str) -> LevelFilter {
        match level.to_uppercase().as_str() {
            "DEBUG" => LevelFilter::Debug,
            "INFO" => LevelFilter::Info,
            "WARN" => LevelFilter::Warn,
            "ERROR" => LevelFilter::Error,
            "TRACE" => LevelFilter::Trace,
            "OFF" => LevelFilter::Off,
            _ => LevelFilter::Info,
        }
    }
}
