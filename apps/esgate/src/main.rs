use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = esgate::Args::parse();
	esgate::run(args).await
}
