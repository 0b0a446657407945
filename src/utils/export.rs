use crate::domain::model::InstanceInfo;
use crate::utils::error::Result;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

const CSV_HEADER: [&str; 9] = [
    "index",
    "name",
    "status",
    "running",
    "cpu",
    "memory",
    "disk_usage",
    "path",
    "version",
];

fn cell(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

pub fn write_instances<W: Write>(
    instances: &[InstanceInfo],
    format: OutputFormat,
    mut writer: W,
) -> Result<()> {
    match format {
        OutputFormat::Table => {
            writeln!(
                writer,
                "{:>5}  {:<28} {:<12} {:>8} {:>10}",
                "INDEX", "NAME", "STATUS", "CPU", "DISK"
            )?;
            for info in instances {
                writeln!(
                    writer,
                    "{:>5}  {:<28} {:<12} {:>8} {:>10}",
                    info.index,
                    info.display_name(),
                    info.display_status(),
                    cell(&info.cpu),
                    cell(&info.disk_usage)
                )?;
            }
            writeln!(writer, "{} instance(s)", instances.len())?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, instances)?;
            writeln!(writer)?;
        }
        OutputFormat::Csv => {
            let mut csv = csv::Writer::from_writer(writer);
            csv.write_record(CSV_HEADER)?;
            for info in instances {
                let running = info.running.map(|r| r.to_string()).unwrap_or_default();
                csv.write_record([
                    info.index.to_string().as_str(),
                    cell(&info.name),
                    cell(&info.status),
                    running.as_str(),
                    cell(&info.cpu),
                    cell(&info.memory),
                    cell(&info.disk_usage),
                    cell(&info.path),
                    cell(&info.version),
                ])?;
            }
            csv.flush()?;
        }
    }
    Ok(())
}
