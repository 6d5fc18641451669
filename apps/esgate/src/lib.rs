use std::{
	fs,
	io::{self, Read},
	path::{Path, PathBuf},
};

use clap::{
	Parser, Subcommand,
	builder::{
		Styles,
		styling::{AnsiColor, Effects},
	},
};
use color_eyre::eyre::{self, WrapErr};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use esgate_domain::threat::Message;
use esgate_service::{EsGateService, Strategy};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(version = VERSION, rename_all = "kebab", styles = styles())]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

/// Inputs are read from a file, or from stdin when the path is `-`.
#[derive(Debug, Subcommand)]
pub enum Command {
	/// Scan a JSON array of chat messages for leaked secrets and personal data.
	Scan {
		#[arg(long, short = 'i', value_name = "FILE", default_value = "-")]
		input: PathBuf,
	},
	/// List the query candidates embedded in model output.
	Extract {
		#[arg(long, short = 'i', value_name = "FILE", default_value = "-")]
		input: PathBuf,
	},
	/// Run every query embedded in model output through the safety pipeline.
	Execute {
		#[arg(long, short = 'i', value_name = "FILE", default_value = "-")]
		input: PathBuf,
		#[arg(long, default_value = "cli")]
		conversation_id: String,
		/// The user question that prompted the output; enables the count path.
		#[arg(long)]
		question: Option<String>,
	},
	/// Analyze, optimize and run a search body against one index.
	Analyze {
		#[arg(long)]
		index: String,
		#[arg(long, short = 'b', value_name = "FILE", default_value = "-")]
		body: PathBuf,
		#[arg(long, default_value_t = Strategy::Balanced)]
		strategy: Strategy,
	},
	/// Ask the model for queries from a JSON message array, re-prompting after failures.
	Converse {
		#[arg(long, short = 'i', value_name = "FILE", default_value = "-")]
		input: PathBuf,
		#[arg(long, default_value = "cli")]
		conversation_id: String,
		#[arg(long)]
		question: Option<String>,
	},
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = esgate_config::load(&args.config)?;
	init_tracing(&config)?;
	let service = EsGateService::new(config)?;

	match args.command {
		Command::Scan { input } => {
			let messages: Vec<Message> = serde_json::from_str(&read_input(&input)?)
				.wrap_err("Scan input must be a JSON array of messages.")?;
			let detection = service.scan_messages(&messages);

			if detection.should_block {
				tracing::warn!(
					risk_score = detection.risk_score,
					threat_types = ?detection.threat_types(),
					"Conversation would be blocked."
				);
			}

			print_json(&detection)
		},
		Command::Extract { input } => print_json(&service.executor.extract(&read_input(&input)?)),
		Command::Execute { input, conversation_id, question } => {
			let text = read_input(&input)?;
			let batch =
				service.execute_llm_output(&text, &conversation_id, question.as_deref()).await;

			print_json(&batch)
		},
		Command::Analyze { index, body, strategy } => {
			let body: Value = serde_json::from_str(&read_input(&body)?)
				.wrap_err("Search body must be a JSON object.")?;
			let result = service.search(&index, &body, strategy).await?;

			print_json(&result)
		},
		Command::Converse { input, conversation_id, question } => {
			let messages: Vec<Value> = serde_json::from_str(&read_input(&input)?)
				.wrap_err("Converse input must be a JSON array of chat messages.")?;
			let outcome = service.converse(messages, &conversation_id, question.as_deref()).await?;

			print_json(&outcome)
		},
	}
}

pub fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Red.on_default() | Effects::BOLD)
		.usage(AnsiColor::Red.on_default() | Effects::BOLD)
		.literal(AnsiColor::Blue.on_default() | Effects::BOLD)
		.placeholder(AnsiColor::Green.on_default())
}

fn read_input(path: &Path) -> color_eyre::Result<String> {
	if path == Path::new("-") {
		let mut raw = String::new();

		io::stdin().read_to_string(&mut raw).wrap_err("Failed to read stdin.")?;

		return Ok(raw);
	}

	fs::read_to_string(path).wrap_err_with(|| format!("Failed to read {}.", path.display()))
}

fn print_json<T>(value: &T) -> color_eyre::Result<()>
where
	T: Serialize,
{
	println!("{}", serde_json::to_string_pretty(value)?);

	Ok(())
}

fn init_tracing(config: &esgate_config::Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(io::stderr)
		.try_init()
		.map_err(|err| eyre::eyre!(err))?;
	Ok(())
}
