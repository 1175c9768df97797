use crate::config::EngineConfig;
use crate::engine::SignatureEngine;
use crate::monitor::DatabaseMonitor;
use crate::scanner::{scan_options_for, EngineLifecycle, ScanCategories, ScanResult};
use crate::utils::format_bytes;
use crate::utils::logging::Logger;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "virus-engine")]
#[command(author = "Security Team")]
#[command(version = "1.0.0")]
#[command(about = "ClamAV扫描引擎管理工具", long_about = None)]
pub struct Command {
    #[command(subcommand)]
    pub subcommand: SubCommands,
    #[arg(short, long, global = true, help = "指定配置文件路径")]
    pub config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "指定病毒库目录")]
    pub database: Option<PathBuf>,
    #[arg(short, long, global = true, help = "显示详细输出")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum SubCommands {
    #[command(name = "info", about = "查看引擎与病毒库信息")]
    Info,
    #[command(name = "scan", about = "扫描文件或目录")]
    Scan(ScanArgs),
    #[command(name = "watch", about = "监控病毒库并自动重建引擎")]
    Watch,
}

#[derive(Args)]
pub struct ScanArgs {
    #[arg(required = true, help = "扫描路径")]
    pub paths: Vec<PathBuf>,
    #[arg(long, help = "不解析文件格式，仅做原始扫描")]
    pub raw: bool,
    #[arg(long, value_delimiter = ',', help = "扫描类别，如 ARCHIVE,PE,PDF")]
    pub categories: Vec<String>,
    #[arg(long, help = "以JSON格式输出结果")]
    pub json: bool,
    #[arg(long, help = "线程数")]
    pub threads: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub result: ScanResult,
    pub error: Option<String>,
}

impl Command {
    pub fn build() -> Self {
        Command::parse()
    }

    pub async fn execute<E: SignatureEngine>(matches: &Command, engine: E) -> Result<()> {
        let config_path = matches.config.clone().unwrap_or_else(EngineConfig::default_path);
        let mut config = EngineConfig::load(&config_path)
            .with_context(|| format!("无法加载配置文件: {:?}", config_path))?;
        if let Some(database) = &matches.database {
            config.database.path = database.clone();
        }

        let level = if matches.verbose {
            log::LevelFilter::Debug
        } else {
            Logger::get_level_filter(&config.logging.level)
        };
        Logger::init(config.logging.log_dir.as_deref(), level)?;

        let lifecycle = Arc::new(Self::open(engine, &config)?);

        match &matches.subcommand {
            SubCommands::Info => Self::handle_info(&lifecycle),
            SubCommands::Scan(args) => Self::handle_scan(args, &config, &lifecycle),
            SubCommands::Watch => Self::handle_watch(&config, lifecycle).await,
        }
    }

    pub fn open<E: SignatureEngine>(engine: E, config: &EngineConfig) -> Result<EngineLifecycle<E>> {
        let lifecycle = EngineLifecycle::new(engine, &config.database.path)?
            .with_policy(config.database.rebuild_policy)
            .with_settings(config.limits);
        lifecycle
            .build()
            .with_context(|| format!("无法构建扫描引擎: {:?}", config.database.path))?;
        Ok(lifecycle)
    }

    fn handle_info<E: SignatureEngine>(lifecycle: &EngineLifecycle<E>) -> Result<()> {
        println!("ClamAV版本: {}", lifecycle.version());
        println!("病毒库目录: {:?}", lifecycle.database_path());
        println!("签名数量: {}", lifecycle.signature_count());

        let settings = lifecycle.settings()?;
        println!(
            "最大文件大小: {}",
            format_bytes(settings.max_file_size.unwrap_or(0))
        );
        println!(
            "最大扫描大小: {}",
            format_bytes(settings.max_scan_size.unwrap_or(0))
        );

        println!("\n病毒库文件:");
        for vd in lifecycle.database_files() {
            match vd.header {
                Some(header) => println!(
                    "  {:?} 版本: {} 签名: {} 功能级别: {} 构建者: {} 构建时间: {}",
                    vd.name,
                    header.version,
                    header.signatures,
                    header.functionality_level,
                    header.builder,
                    header
                        .build_time
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                        .unwrap_or_else(|| "未知".to_string())
                ),
                None => println!("  {:?} (无法读取文件头)", vd.name),
            }
        }
        Ok(())
    }

    pub fn categories(args: &ScanArgs, config: &EngineConfig) -> ScanCategories {
        if args.raw {
            ScanCategories::RAW
        } else if args.categories.is_empty() {
            config.scan.categories()
        } else {
            scan_options_for(&args.categories)
        }
    }

    pub fn scan_paths<E: SignatureEngine>(
        lifecycle: &EngineLifecycle<E>,
        paths: &[PathBuf],
        categories: ScanCategories,
    ) -> Vec<FileReport> {
        let files: Vec<PathBuf> = paths
            .iter()
            .flat_map(|root| {
                WalkDir::new(root)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(|entry| match entry {
                        Ok(entry) => Some(entry),
                        Err(e) => {
                            log::warn!("访问路径错误: {}", e);
                            None
                        }
                    })
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path())
            })
            .collect();

        files
            .into_par_iter()
            .map(|path| match lifecycle.scan_path(&path, categories) {
                Ok(result) => FileReport {
                    path,
                    result,
                    error: None,
                },
                Err(e) => FileReport {
                    path,
                    result: ScanResult::failed(),
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }

    fn handle_scan<E: SignatureEngine>(
        args: &ScanArgs,
        config: &EngineConfig,
        lifecycle: &EngineLifecycle<E>,
    ) -> Result<()> {
        let categories = Self::categories(args, config);
        let threads = args.threads.unwrap_or(config.scan.thread_count).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("无法创建扫描线程池")?;

        let start_time = Instant::now();
        let reports = pool.install(|| Self::scan_paths(lifecycle, &args.paths, categories));
        let duration = start_time.elapsed();

        if args.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
            return Ok(());
        }

        let mut infected = 0;
        let mut errors = 0;
        let mut bytes = 0;
        for report in &reports {
            bytes += report.result.bytes_scanned;
            if let Some(error) = &report.error {
                errors += 1;
                println!("{}: 错误 ({})", report.path.display(), error);
            } else if report.result.is_infected() {
                infected += 1;
                println!(
                    "{}: {} FOUND",
                    report.path.display(),
                    report.result.signature_name.as_deref().unwrap_or("")
                );
            } else {
                println!("{}: OK", report.path.display());
            }
        }

        println!("\n扫描完成!");
        println!("扫描文件数: {}", reports.len());
        println!("发现威胁数: {}", infected);
        println!("错误数: {}", errors);
        println!("扫描数据量: {}", format_bytes(bytes));
        println!("扫描耗时: {:.2}秒", duration.as_secs_f64());

        Ok(())
    }

    async fn handle_watch<E: SignatureEngine>(
        config: &EngineConfig,
        lifecycle: Arc<EngineLifecycle<E>>,
    ) -> Result<()> {
        let interval = config.database.poll_interval()?;
        let mut monitor = DatabaseMonitor::new(lifecycle, interval);
        monitor.start()?;
        println!("病毒库监控已启动");
        println!("病毒库目录: {:?}", config.database.path);
        println!("轮询间隔: {}", config.database.poll_interval);

        tokio::signal::ctrl_c().await?;
        monitor.stop();
        println!("监控已停止");
        Ok(())
    }
}
