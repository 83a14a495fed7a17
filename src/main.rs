use actix::prelude::*;
use anyhow::{Context as _, Result};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

use cachedown::cli;
use cachedown::core::task::util::filename_from_url;
use cachedown::core::task::DEFAULT_FILENAME;
use cachedown::core::*;
use cachedown::ui::{self, DownloadSummary, ProgressManager};
use cachedown::utils::logger::init_logger;
use cachedown::utils::validator::{parse_source_url, validate_output_path};

const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

#[actix::main]
async fn main() -> Result<()> {
    // 解析参数和配置
    let (args, config) = match cli::Args::parse_args() {
        Ok((args, config)) => (args, config),
        Err(e) => {
            eprintln!("参数解析失败: {}", e);
            std::process::exit(1);
        }
    };

    if args.edit_config {
        cli::open_config_in_editor(&args.config);
        return Ok(());
    }

    let log_file = Some(config.log_file.trim())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);
    init_logger(&config.log_level, log_file.as_deref())?;
    info!("程序启动, 配置文件: {}", args.config);
    info!("{}", config.get_summary());

    // 获取下载URL列表
    let urls = match args.get_urls() {
        Ok(urls) => urls,
        Err(e) => {
            error!("获取URL列表失败: {}", e);
            eprintln!("获取URL列表失败: {}", e);
            std::process::exit(1);
        }
    };
    info!("解析到的URLs: {:?}", urls);

    let manager = DownloadManagerActor::new(config)
        .context("无法打开缓存目录")?
        .start();

    let failed = if args.list {
        list_cache(&manager, args.json).await?;
        0
    } else if args.remove {
        remove_urls(&manager, &urls, args.delete, args.json).await?
    } else {
        run_downloads(&manager, &args, &urls).await?
    };

    manager.send(Shutdown).await??;
    info!("程序退出");

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// 列出缓存中的URL
async fn list_cache(manager: &Addr<DownloadManagerActor>, json: bool) -> Result<()> {
    let entries = manager.send(ListCacheEntries).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("缓存为空");
    }
    for entry in &entries {
        println!(
            "{}  {}  {}",
            entry.hash,
            entry.filename.as_deref().unwrap_or(DEFAULT_FILENAME),
            entry.url
        );
    }
    Ok(())
}

/// 移除URL的缓存，返回失败数量
async fn remove_urls(
    manager: &Addr<DownloadManagerActor>,
    urls: &[String],
    delete_file: bool,
    json: bool,
) -> Result<usize> {
    let mut failed = 0;
    let mut outcomes = Vec::new();
    for url in urls {
        match manager
            .send(RemoveTasksByUrl { url: url.clone(), delete_file })
            .await?
        {
            Ok(outcome) => {
                if !json {
                    ui::print_success(&format!(
                        "已移除 {} (删除文件: {})",
                        url,
                        if outcome.deleted { "是" } else { "否" }
                    ));
                }
                outcomes.push(serde_json::json!({ "url": url, "deleted": outcome.deleted }));
            }
            Err(e) => {
                failed += 1;
                ui::print_error(&format!("移除失败: {} - {}", url, e));
            }
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    }
    Ok(failed)
}

/// 创建并提交所有下载任务，等待完成后导出，返回失败数量
async fn run_downloads(
    manager: &Addr<DownloadManagerActor>,
    args: &cli::Args,
    urls: &[String],
) -> Result<usize> {
    let started = Instant::now();
    if let Some(out_dir) = &args.out_dir {
        validate_output_path(out_dir)?;
    }
    let mut progress = if args.json {
        ProgressManager::hidden()
    } else {
        ProgressManager::new()
    };

    let task_ids = create_and_submit_tasks(manager, args, urls, &mut progress).await?;
    let mut failed = urls.len() - task_ids.len();
    if task_ids.is_empty() {
        eprintln!("没有可下载的任务");
        return Ok(failed);
    }
    info!("开始下载 {} 个任务", task_ids.len());

    // 轮询状态并刷新进度条
    let records = loop {
        let mut records = Vec::with_capacity(task_ids.len());
        for task_id in &task_ids {
            if let Some(record) = manager.send(QueryTaskStatusById { task_id: *task_id }).await? {
                progress.update(&record);
                records.push(record);
            }
        }
        if records.iter().all(|r| r.done) {
            break records;
        }
        actix_rt::time::sleep(PROGRESS_UPDATE_INTERVAL).await;
    };
    progress.finish();

    let mut exported = Vec::new();
    if let Some(out_dir) = &args.out_dir {
        let name_override = if records.len() == 1 { args.file_name.clone() } else { None };
        for record in records.iter().filter(|r| r.status == TaskStatus::Finished) {
            match export_file(manager, record.id, name_override.clone(), Path::new(out_dir)).await {
                Ok(path) => exported.push((record.id, path)),
                Err(e) => {
                    failed += 1;
                    ui::print_error(&format!("导出失败: {} - {:#}", record.url, e));
                }
            }
        }
    }

    let success_count = records.iter().filter(|r| r.status == TaskStatus::Finished).count();
    failed += records.len() - success_count;

    if args.json {
        let output: Vec<_> = records
            .iter()
            .map(|record| {
                let path = exported.iter().find(|(id, _)| *id == record.id).map(|(_, p)| p);
                serde_json::json!({ "task": record, "exported": path })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for record in &records {
            match (&record.status, &record.content_hash) {
                (TaskStatus::Finished, Some(hash)) => {
                    ui::print_success(&format!("{} -> {}", record.url, hash))
                }
                _ => ui::print_error(&format!("下载失败: {}", record.url)),
            }
        }
        for (_, path) in &exported {
            ui::print_success(&format!("已导出: {}", path.display()));
        }
        let summary = DownloadSummary {
            total_files: records.len(),
            total_size: records
                .iter()
                .filter(|r| r.status == TaskStatus::Finished && r.total_bytes > 0)
                .map(|r| r.total_bytes as u64)
                .sum(),
            elapsed_time: started.elapsed(),
            success_count,
            failed_count: records.len() - success_count,
        };
        println!("{}", summary);
    }
    info!("下载完成 - 成功: {}, 失败: {}", success_count, failed);

    Ok(failed)
}

async fn create_and_submit_tasks(
    manager: &Addr<DownloadManagerActor>,
    args: &cli::Args,
    urls: &[String],
    progress: &mut ProgressManager,
) -> Result<Vec<Uuid>> {
    let mut task_ids = Vec::new();

    for url in urls {
        let task_id = match manager
            .send(CreateTask { url: url.clone(), force_refresh: args.force })
            .await?
        {
            Ok(task_id) => task_id,
            Err(e) => {
                ui::print_error(&format!("创建下载任务失败: {} - {}", url, e));
                continue;
            }
        };
        if let Err(e) = manager.send(SubmitTask { task_id }).await? {
            warn!("提交任务失败 {}: {}", task_id, e);
            ui::print_error(&format!("提交下载任务失败: {} - {}", url, e));
            manager.do_send(RemoveTaskById { task_id, delete_file: false });
            if e.is_fatal() {
                break;
            }
            continue;
        }

        let label = parse_source_url(url)
            .ok()
            .and_then(|u| filename_from_url(&u))
            .unwrap_or_else(|| url.clone());
        progress.add_task(task_id, &label);
        task_ids.push(task_id);
    }

    Ok(task_ids)
}

/// 把缓存文件复制到导出目录
async fn export_file(
    manager: &Addr<DownloadManagerActor>,
    task_id: Uuid,
    filename: Option<String>,
    out_dir: &Path,
) -> Result<PathBuf> {
    let mut fetched = manager.send(FetchFile { task_id, filename }).await??;
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("无法创建目录 {}", out_dir.display()))?;

    let target = out_dir.join(&fetched.filename);
    let mut output = tokio::fs::File::create(&target)
        .await
        .with_context(|| format!("无法创建文件 {}", target.display()))?;
    let copied = tokio::io::copy(&mut fetched.file, &mut output).await?;
    output.sync_all().await?;
    info!("已导出 {} 字节: {} -> {}", copied, fetched.path.display(), target.display());
    Ok(target)
}
