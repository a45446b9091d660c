use std::path::Path;

use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use cloudfs::{
    config::{BackendConfig, Config},
    logging::init_tracing,
    provider::{LocalProvider, S3Provider},
    CloudFileSystem, StorageProvider,
};
use tracing::{debug, error};

fn cli() -> Command {
    let path = |help: &'static str| Arg::new("path").required(true).value_name("PATH").help(help);

    Command::new("cloudfs")
        .version("1.0")
        .about("Browse and edit a cloud bucket or local share as a filesystem")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .subcommand(Command::new("ls").about("List a directory").arg(
            Arg::new("path").value_name("PATH").default_value("/").help("Directory to list"),
        ))
        .subcommand(
            Command::new("stat")
                .about("Show object metadata")
                .arg(path("Object path, directories end with /")),
        )
        .subcommand(Command::new("cat").about("Print a file to stdout").arg(path("File to print")))
        .subcommand(
            Command::new("put")
                .about("Upload a local file")
                .arg(
                    Arg::new("source")
                        .required(true)
                        .value_name("LOCAL")
                        .help("Local file to upload"),
                )
                .arg(path("Destination path")),
        )
        .subcommand(
            Command::new("mkdir")
                .about("Create a directory")
                .arg(
                    Arg::new("parents")
                        .short('p')
                        .long("parents")
                        .action(clap::ArgAction::SetTrue)
                        .help("Create missing parent directories"),
                )
                .arg(path("Directory to create")),
        )
        .subcommand(
            Command::new("rm")
                .about("Remove a file or directory")
                .arg(
                    Arg::new("recursive")
                        .short('r')
                        .long("recursive")
                        .action(clap::ArgAction::SetTrue)
                        .help("Remove directories and their contents"),
                )
                .arg(path("Path to remove")),
        )
        .subcommand(
            Command::new("mv")
                .about("Rename a file or directory")
                .arg(Arg::new("from").required(true).value_name("FROM"))
                .arg(Arg::new("to").required(true).value_name("TO")),
        )
}

fn arg<'a>(matches: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(|s| s.as_str())
        .with_context(|| format!("missing argument <{name}>"))
}

async fn run<P: StorageProvider>(
    provider: P,
    config: &Config,
    matches: &ArgMatches,
) -> anyhow::Result<()> {
    let fs = CloudFileSystem::new(provider, config.filesystem.clone())?;
    // One-shot commands should fail fast instead of retrying.
    fs.set_disable_retry(true);
    fs.connect().await?;

    let result = execute(&fs, matches).await;
    if let Err(e) = fs.close().await {
        debug!("closing backend failed: {}", e);
    }
    result
}

async fn execute<P: StorageProvider>(
    fs: &CloudFileSystem<P>,
    matches: &ArgMatches,
) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("ls", sub)) => {
            for entry in fs.read_dir(arg(sub, "path")?).await? {
                if entry.is_dir {
                    println!("{:o} {:>12} {}", entry.mode(), "-", entry.name);
                } else {
                    println!(
                        "{:o} {:>12} {} {}",
                        entry.mode(),
                        entry.size,
                        entry.last_modified.format("%Y-%m-%d %H:%M:%S"),
                        entry.name
                    );
                }
            }
        }
        Some(("stat", sub)) => {
            let info = fs.stat(arg(sub, "path")?).await?;
            println!("name:          {}", info.name);
            println!("type:          {}", if info.is_dir { "directory" } else { "file" });
            println!("size:          {}", info.size);
            println!("content type:  {}", info.content_type.as_deref().unwrap_or("-"));
            println!("last modified: {}", info.last_modified);
        }
        Some(("cat", sub)) => {
            use std::io::Write;

            let mut file = fs.open(arg(sub, "path")?).await?;
            let mut buf = vec![0u8; 64 * 1024];
            let mut stdout = std::io::stdout().lock();
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                stdout.write_all(&buf[..n])?;
            }
            file.close().await?;
        }
        Some(("put", sub)) => {
            let source = arg(sub, "source")?;
            let data = tokio::fs::read(Path::new(source))
                .await
                .with_context(|| format!("cannot read {source}"))?;
            let mut file = fs.create(arg(sub, "path")?).await?;
            file.write(&data).await?;
            file.close().await?;
        }
        Some(("mkdir", sub)) => {
            let path = arg(sub, "path")?;
            if sub.get_flag("parents") {
                fs.mkdir_all(path).await?;
            } else {
                fs.mkdir(path).await?;
            }
        }
        Some(("rm", sub)) => {
            let path = arg(sub, "path")?;
            if sub.get_flag("recursive") {
                fs.remove_all(path).await?;
            } else {
                fs.remove(path).await?;
            }
        }
        Some(("mv", sub)) => fs.rename(arg(sub, "from")?, arg(sub, "to")?).await?,
        _ => anyhow::bail!("unknown command"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let config_file = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or("cloudfs.toml");
    let config = Config::load(config_file).with_context(|| format!("cannot load {config_file}"))?;

    init_tracing(config.loglevel())?;

    let result = match &config.backend {
        BackendConfig::S3(s3) => {
            let provider = S3Provider::new(s3).await?;
            debug!("using {}", provider);
            run(provider, &config, &matches).await
        }
        BackendConfig::Local(local) => {
            let provider = LocalProvider::new(local.root.clone())?;
            run(provider, &config, &matches).await
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
