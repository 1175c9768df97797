use anyhow::Result;
use std::process;
use virus_engine::cli::Command;
use virus_engine::engine::ClamAv;

#[tokio::main]
async fn main() -> Result<()> {
    let command = Command::build();

    match Command::execute(&command, ClamAv::new()).await {
        Ok(_) => {
            log::info!("程序执行完成");
            Ok(())
        }
        Err(e) => {
            log::error!("执行错误: {}", e);
            eprintln!("错误: {:#}", e);
            process::exit(1);
        }
    }
}
