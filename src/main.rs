use clap::Parser;
use mumu_manager::automation::batch_processor::BatchStatus;
use mumu_manager::automation::engine::{AutomationEvent, StopReason};
use mumu_manager::automation::optimizer::{optimal_batch_size, partition, LoadTier};
use mumu_manager::automation::retry::RetryManager;
use mumu_manager::config::cli::{
    parse_setting_pairs, AutomationBatchArgs, AutomationCommand, AutomationOverrides,
    AutomationRunArgs, Command, InfoArgs, SettingsCommand,
};
use mumu_manager::domain::ports::{InstanceController, ResourceProbe};
use mumu_manager::utils::error::ErrorSeverity;
use mumu_manager::utils::export::write_instances;
use mumu_manager::utils::monitor::SystemMonitor;
use mumu_manager::utils::validation::{parse_indices, Validate, MAX_INDICES_PER_COMMAND};
use mumu_manager::utils::logger;
use mumu_manager::{
    AppConfig, AutomationConfig, AutomationEngine, AutomationSettings, BatchProcessor, CliConfig,
    InstanceCache, MumuError, MumuManager, Result,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    let app = match AppConfig::load(cli.config.as_deref()) {
        Ok(app) => app,
        Err(e) => {
            logger::init_cli_logger(cli.verbose);
            fail(&e);
        }
    };

    logger::init_logger(cli.verbose, cli.json_logs || app.json_logs());

    tracing::info!("Starting mumu-manager CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = cli.validate().and_then(|_| app.validate()) {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let monitor_enabled = cli.monitor || app.monitoring_enabled();
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let manager = Arc::new(MumuManager::new(app.manager_options(cli.executable.clone())));
    match manager.executable() {
        Some(path) => tracing::debug!("Using {}", path.display()),
        None => tracing::warn!("⚠️ MuMuManager.exe not found; commands will fail"),
    }

    let monitor = Arc::new(SystemMonitor::new(monitor_enabled));
    let result = run(cli.command, &app, Arc::clone(&manager), Arc::clone(&monitor)).await;
    monitor.log_final_stats();
    let bus = manager.bus_stats();
    tracing::debug!(
        "📊 Backend commands: {} completed, {} failed",
        bus.completed,
        bus.failed
    );

    if let Err(e) = result {
        fail(&e);
    }
}

fn fail(e: &MumuError) -> ! {
    tracing::error!(
        "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());

    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code)
}

async fn run(
    command: Command,
    app: &AppConfig,
    manager: Arc<MumuManager>,
    monitor: Arc<SystemMonitor>,
) -> Result<()> {
    match command {
        Command::Info(args) => info(&manager, args).await,
        Command::Control { indices, action } => {
            let indices = parse_indices(&indices)?;
            for chunk in indices.chunks(MAX_INDICES_PER_COMMAND) {
                let output = manager.control_instance(chunk, action).await?;
                print_output(&output);
            }
            println!("✅ {} sent to {} instance(s)", action, indices.len());
            Ok(())
        }
        Command::Create { count } => {
            print_output(&manager.create_instance(count).await?);
            Ok(())
        }
        Command::Clone { source, count } => {
            print_output(&manager.clone_instance(source, count).await?);
            Ok(())
        }
        Command::Delete { indices, yes } => {
            let indices = parse_indices(&indices)?;
            if !yes && !confirm(&format!("Delete {} instance(s) {:?}?", indices.len(), indices))? {
                println!("Cancelled");
                return Ok(());
            }
            print_output(&manager.delete_instance(&indices).await?);
            Ok(())
        }
        Command::Rename { index, name } => {
            print_output(&manager.rename_instance(index, &name).await?);
            Ok(())
        }
        Command::Adb { indices, command } => {
            let indices = parse_indices(&indices)?;
            let command: Vec<String> = command
                .iter()
                .map(|token| {
                    if token.contains(char::is_whitespace) {
                        format!("\"{}\"", token)
                    } else {
                        token.clone()
                    }
                })
                .collect();
            print_output(&manager.run_adb(&indices, &command.join(" ")).await?);
            Ok(())
        }
        Command::Simulation { indices, key, value } => {
            let indices = parse_indices(&indices)?;
            print_output(&manager.set_simulation_value(&indices, &key, &value).await?);
            Ok(())
        }
        Command::Settings(SettingsCommand::Show { index, writable }) => {
            let settings = if writable {
                manager.get_writable_settings(index).await?
            } else {
                manager.get_settings_info(index).await?
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Command::Settings(SettingsCommand::Set { indices, pairs }) => {
            let indices = parse_indices(&indices)?;
            let pairs = parse_setting_pairs(&pairs)?;
            print_output(&manager.set_settings(&indices, &pairs).await?);
            Ok(())
        }
        Command::StopAll { indices } => stop_all(app, &manager, indices).await,
        Command::Watch { interval } => watch(manager, Duration::from_secs(interval)).await,
        Command::Automation(AutomationCommand::Run(args)) => {
            automation_run(app, manager, monitor, args).await
        }
        Command::Automation(AutomationCommand::Batch(args)) => {
            automation_batch(app, manager, monitor, args).await
        }
        Command::Automation(AutomationCommand::Show { settings }) => {
            let path = settings.unwrap_or_else(|| app.settings_file());
            let settings = AutomationSettings::load(&path)?;
            println!("📄 {}", path.display());
            println!("{}", serde_json::to_string_pretty(&settings)?);
            let schedule = settings.schedule()?;
            match schedule.next_run_after(chrono::Local::now().naive_local()) {
                Some(next) => println!("⏰ Next auto start: {}", next),
                None => println!("⏰ Auto start disabled"),
            }
            Ok(())
        }
        Command::Monitor { interval, count } => {
            watch_host(&monitor, Duration::from_secs(interval), count).await;
            Ok(())
        }
        Command::Version => {
            println!("{}", manager.version().await?);
            Ok(())
        }
    }
}

fn print_output(output: &str) {
    if !output.trim().is_empty() {
        println!("{}", output.trim());
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn info(manager: &MumuManager, args: InfoArgs) -> Result<()> {
    let instances = match args.index {
        Some(index) => vec![manager.get_single_info(index).await?],
        None => manager.get_all_info().await?.into_values().collect(),
    };

    match &args.output {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            write_instances(&instances, args.format, io::BufWriter::new(file))?;
            println!("📁 Output saved to: {}", path.display());
        }
        None => write_instances(&instances, args.format, io::stdout().lock())?,
    }
    Ok(())
}

async fn stop_all(app: &AppConfig, manager: &Arc<MumuManager>, indices: Option<String>) -> Result<()> {
    let targets = match indices {
        Some(indices) => parse_indices(&indices)?,
        None => {
            let cache = InstanceCache::new();
            cache
                .get_all_cached(&**manager, app.instance_cache_ttl())
                .await?
                .values()
                .filter(|info| info.is_running())
                .map(|info| info.index)
                .collect()
        }
    };

    if targets.is_empty() {
        println!("No running instances");
        return Ok(());
    }

    manager.stop_all(&targets).await?;
    println!("🛑 Shut down {} instance(s)", targets.len());
    Ok(())
}

async fn watch(manager: Arc<MumuManager>, interval: Duration) -> Result<()> {
    let cache = Arc::new(InstanceCache::new());
    let mut changes = cache.subscribe();
    let refresher = cache.spawn_auto_refresh(manager, interval);
    println!("👀 Watching instances every {:?}, Ctrl-C to stop", interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = changes.recv() => match received {
                Ok(change) => {
                    for index in &change.added {
                        println!("➕ {}", describe(&cache, *index).await);
                    }
                    for index in &change.modified {
                        println!("✏️  {}", describe(&cache, *index).await);
                    }
                    for index in &change.removed {
                        println!("➖ instance {}", index);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("⚠️ Skipped {} change notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    refresher.abort();
    Ok(())
}

async fn describe(cache: &InstanceCache, index: u32) -> String {
    match cache.get(index).await {
        Some(info) => format!("{} [{}] {}", info.index, info.display_status(), info.display_name()),
        None => format!("instance {}", index),
    }
}

fn load_settings(
    app: &AppConfig,
    path: Option<PathBuf>,
    overrides: &AutomationOverrides,
) -> Result<(PathBuf, AutomationSettings)> {
    let path = path.unwrap_or_else(|| app.settings_file());
    let mut settings = AutomationSettings::load(&path)?;
    if let Some(from) = overrides.from {
        settings.from_instance = from;
    }
    if let Some(to) = overrides.to {
        settings.to_instance = to;
    }
    if let Some(batch_size) = overrides.batch_size {
        settings.batch_size = batch_size;
    }
    Ok((path, settings))
}

async fn automation_run(
    app: &AppConfig,
    manager: Arc<MumuManager>,
    monitor: Arc<SystemMonitor>,
    args: AutomationRunArgs,
) -> Result<()> {
    let (path, mut settings) = load_settings(app, args.settings.clone(), &args.range)?;
    if let Some(delay) = args.batch_delay {
        settings.batch_delay = delay;
    }
    if let Some(delay) = args.start_delay {
        settings.start_delay = delay;
    }
    if let Some(threshold) = args.cpu_threshold {
        settings.cpu_threshold = threshold;
    }
    if let Some(retries) = args.max_retries {
        settings.max_retries = retries;
    }
    if args.no_ai {
        settings.enable_ai_optimization = false;
    }
    if args.no_cpu_protection {
        settings.enable_cpu_protection = false;
    }
    settings.validate()?;

    if args.save {
        settings.save(&path)?;
    }

    let config = settings.to_automation_config(AutomationConfig {
        monitor_interval: app.monitor_interval(),
        shutdown_on_overload: app.shutdown_on_overload(),
        retry_base_delay: app.retry_base_delay(),
        ..AutomationConfig::default()
    })?;

    if args.scheduled {
        let schedule = settings.schedule()?;
        if !schedule.enabled {
            return Err(MumuError::ValidationError {
                message: "Auto start is disabled in the automation settings".to_string(),
            });
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelled");
                return Ok(());
            }
            _ = schedule.wait_until_due() => {}
        }
    }

    let engine = AutomationEngine::new(manager, monitor);
    let handle = engine.handle();
    let mut events = engine.subscribe();

    let printer = tokio::spawn({
        let handle = handle.clone();
        async move {
            while let Some(event) = next_event(&mut events).await {
                match event {
                    AutomationEvent::BatchStarted { batch, total_batches, instances } => {
                        println!("🚀 Batch {}/{}: {:?}", batch, total_batches, instances);
                    }
                    AutomationEvent::InstanceProcessed { outcome } => {
                        let mark = if outcome.success { "✅" } else { "❌" };
                        println!("  {} {} {}", mark, outcome.index, outcome.message);
                    }
                    AutomationEvent::Progress { processed, total } => {
                        let metrics = handle.metrics();
                        println!(
                            "📈 {}/{} ({:.0}%, ETA {})",
                            processed,
                            total,
                            metrics.progress_percent(),
                            metrics.eta(tokio::time::Instant::now())
                        );
                    }
                    _ => {}
                }
            }
        }
    });

    let mut task = engine.spawn(config);
    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            println!("🛑 Stopping after the current launch...");
            handle.stop();
            task.await
        }
    };
    printer.abort();

    let report = joined.map_err(|e| MumuError::AutomationError {
        message: format!("Automation task failed: {}", e),
    })??;

    match &report.stop_reason {
        StopReason::Completed => println!("✅ Automation completed"),
        StopReason::UserRequested => println!("⏹️ Automation stopped"),
        StopReason::CpuOverload { cpu } => {
            println!("🔥 Automation aborted at {:.1}% CPU", cpu);
            if !report.shut_down.is_empty() {
                println!("🛑 Shut down {} instance(s)", report.shut_down.len());
            }
        }
    }
    println!(
        "📊 {} succeeded, {} failed, batch size {}, {:.1}s elapsed",
        report.successful(),
        report.failed(),
        report.batch_size,
        report.metrics.elapsed(tokio::time::Instant::now()).as_secs_f64()
    );
    Ok(())
}

async fn automation_batch(
    app: &AppConfig,
    manager: Arc<MumuManager>,
    monitor: Arc<SystemMonitor>,
    args: AutomationBatchArgs,
) -> Result<()> {
    let (_, settings) = load_settings(app, args.settings.clone(), &args.range)?;
    settings.validate()?;

    let batches = partition(settings.from_instance, settings.to_instance, settings.batch_size);
    let workers = args.workers.unwrap_or_else(|| app.max_concurrent_batches());
    let processor = Arc::new(
        BatchProcessor::new(manager, monitor, workers)
            .with_retry(RetryManager::new(settings.max_retries, app.retry_base_delay()))
            .with_dispatch_delay(app.dispatch_delay()),
    );

    println!("🚀 {} batch(es) on {} worker(s)", batches.len(), workers);
    let mut task = tokio::spawn({
        let processor = Arc::clone(&processor);
        async move { processor.process(batches).await }
    });
    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            println!("🛑 Stopping, running batches will finish...");
            processor.stop();
            task.await
        }
    };
    let results = joined.map_err(|e| MumuError::AutomationError {
        message: format!("Batch task failed: {}", e),
    })??;

    for result in &results {
        let mark = match result.status {
            BatchStatus::Completed => "✅",
            _ => "❌",
        };
        println!(
            "{} batch {} {:?}: {} ok, {} failed, {} retries, {:?}",
            mark,
            result.batch_id,
            result.instances,
            result.successful.len(),
            result.failed.len(),
            result.retry_count,
            result.processing_time
        );
    }
    let stats = processor.stats();
    println!(
        "📊 {:.0}% success, {:.1} instances/min",
        stats.success_rate, stats.throughput
    );
    Ok(())
}

/// Next event, skipping over any the receiver fell behind on. `None` once the sender is gone.
async fn next_event<T: Clone>(events: &mut broadcast::Receiver<T>) -> Option<T> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("⚠️ Skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn watch_host(monitor: &SystemMonitor, interval: Duration, count: Option<u32>) {
    if !monitor.is_enabled() {
        tracing::info!("Detailed process stats are off; pass --monitor to log them");
    }
    let mut ticker = tokio::time::interval(interval);
    let mut taken = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let sample = monitor.sample();
                println!(
                    "CPU {:5.1}%  MEM {:5.1}%  {:?}, suggested batch size {}",
                    sample.cpu_percent,
                    sample.memory_percent,
                    LoadTier::classify(sample),
                    optimal_batch_size(sample, AutomationConfig::default().batch_size)
                );
                monitor.log_stats("Host");
                taken += 1;
                if count.is_some_and(|limit| taken >= limit) {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_next_event_skips_lag() {
        let (sender, mut events) = broadcast::channel(2);
        for value in 0..5 {
            sender.send(value).unwrap();
        }

        assert_eq!(next_event(&mut events).await, Some(3));
        assert_eq!(next_event(&mut events).await, Some(4));

        drop(sender);
        assert_eq!(next_event(&mut events).await, None);
    }
}
