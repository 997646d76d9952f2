// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{command, Args, Parser, Subcommand};
use data_security::{Consumer, Message, PipelineConfig, Processor, Producer, Role};
use kms::Cmk;
use log::info;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    runtime::Handle,
};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "envelope-tool")]
#[command(bin_name = "envelope-tool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// path of the pipeline configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new CMK
    CreateCmk,

    /// Seal the given file
    Seal(SealArgs),

    /// Unseal the given sealed file
    Unseal(UnsealArgs),
}

#[derive(Args)]
struct SealArgs {
    /// id of the CMK that wraps the data key
    #[arg(long)]
    cmk_id: String,

    /// ARN of the CMK
    #[arg(long)]
    cmk_arn: Option<String>,

    /// path of the file which contains the content to be sealed
    #[arg(short, long)]
    file_path: String,
}

#[derive(Args)]
struct UnsealArgs {
    /// path of the file which contains the sealed message
    #[arg(short, long)]
    file_path: String,
}

/// Writes the unsealed payload to a new file.
struct FileSink {
    path: PathBuf,
}

#[async_trait]
impl Processor for FileSink {
    async fn process(&self, plaintext: &[u8]) -> anyhow::Result<()> {
        write_new(&self.path, plaintext).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = PipelineConfig::new(cli.config)?;

    match cli.command {
        Command::CreateCmk => create_cmk(&config).await,
        Command::Seal(args) => seal(&config, &args).await,
        Command::Unseal(args) => unseal(&config, &args).await,
    }
}

async fn create_cmk(config: &PipelineConfig) -> Result<()> {
    let kms = config.kms_client(Role::Encrypt).await?;
    let cmk = kms.create_cmk().await.context("create CMK")?;
    println!("{cmk}");
    Ok(())
}

async fn seal(config: &PipelineConfig, args: &SealArgs) -> Result<()> {
    let plaintext = Zeroizing::new(
        fs::read(&args.file_path)
            .await
            .with_context(|| format!("read {}", args.file_path))?,
    );

    let producer = Producer::new(config.kms_client(Role::Encrypt).await?, Handle::current());
    let cmk = Cmk::new(args.cmk_id.clone(), args.cmk_arn.clone());
    let message = producer.encrypt(&cmk, &plaintext).await?;

    let output = output_path(&args.file_path, "sealed");
    write_new(&output, message.to_json()?.as_bytes()).await?;

    info!("{message}");
    println!("seal success, message is saved in newly generated file: {output:?}");
    Ok(())
}

async fn unseal(config: &PipelineConfig, args: &UnsealArgs) -> Result<()> {
    let sealed = fs::read_to_string(&args.file_path)
        .await
        .with_context(|| format!("read {}", args.file_path))?;
    let message = Message::from_json(&sealed)?;

    let output = output_path(&args.file_path, "unsealed");
    let consumer = Consumer::new(
        config.kms_client(Role::Decrypt).await?,
        FileSink {
            path: output.clone(),
        },
        Handle::current(),
    );
    consumer.receive(&message).await?;

    println!("unseal success, secret is saved in newly generated file: {output:?}");
    Ok(())
}

fn output_path(input: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{input}.{suffix}"))
}

/// Write `content` to a file that must not exist yet.
async fn write_new(path: &Path, content: &[u8]) -> Result<()> {
    let mut file: File = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .with_context(|| format!("create {path:?}, it must not exist yet"))?;
    file.write_all(content)
        .await
        .with_context(|| format!("write {path:?}"))?;
    file.flush().await?;
    Ok(())
}
