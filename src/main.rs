use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use secure_evaluator::models::{load_all_documents, load_document};
use secure_evaluator::utils::logging;
use secure_evaluator::{App, AssignmentId, Config};
use tracing::{error, info};

const USAGE: &str = "用法:
  secure_evaluator upload <文件> [上传者]
  secure_evaluator upload-dir <文件夹> [上传者]
  secure_evaluator ask <作业ID> <评估者>      (从标准输入逐行读取问题)
  secure_evaluator suggest <作业ID> [评估者]
  secure_evaluator state <作业ID> <评估者>
  secure_evaluator delete <作业ID>
  secure_evaluator purge

配置: 设置 CONFIG_FILE 指向 TOML 文件，或直接使用环境变量";

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = match std::env::var("CONFIG_FILE") {
        Ok(path) => Config::from_toml_file(Path::new(&path))?,
        Err(_) => Config::from_env(),
    };

    // 初始化日志
    logging::init_with(config.verbose_logging);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };
    let arg = |i: usize| args.get(i).map(String::as_str);

    let app = App::initialize(config).await?;

    match (command.as_str(), arg(1), arg(2)) {
        ("upload", Some(file), owner) => {
            let text = load_document(Path::new(file)).await?;
            let id = app.upload(owner.unwrap_or("candidate"), &text).await?;
            println!("{}", id);
        }
        ("upload-dir", Some(folder), owner) => {
            for (path, text) in load_all_documents(folder).await? {
                let id = app.upload(owner.unwrap_or("candidate"), &text).await?;
                println!("{}\t{}", id, path.display());
            }
        }
        ("ask", Some(id), Some(evaluator)) => {
            let id = AssignmentId::from(id);
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let question = line.context("读取标准输入失败")?;
                if question.trim().is_empty() {
                    continue;
                }
                match app.ask(&id, evaluator, &question).await {
                    Ok(response) => println!("[{:?}] {}\n", response.flag, response.answer),
                    Err(e) if e.is_retryable() => error!("❌ 暂时无法回答，请稍后重试: {}", e),
                    Err(e) => return Err(e.into()),
                }
            }
        }
        ("suggest", Some(id), evaluator) => {
            for question in app.suggest_questions(&AssignmentId::from(id), evaluator).await? {
                println!("- {}", question);
            }
        }
        ("state", Some(id), Some(evaluator)) => {
            let state = app.throttle_state(&AssignmentId::from(id), evaluator).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        ("delete", Some(id), _) => {
            if app.delete(&AssignmentId::from(id)).await? {
                info!("✓ 作业已删除");
            } else {
                info!("作业不存在: {}", id);
            }
        }
        ("purge", _, _) => {
            let purged = app.purge_expired().await?;
            info!("✓ 清理完成，共删除 {} 个作业", purged.len());
        }
        _ => println!("{}", USAGE),
    }

    Ok(())
}
