use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgMatches, Command};
use log::{info, warn};
use ncs_client::capture::AudioSource;
use ncs_client::client::{self, RequestSettings};
use ncs_client::opus_codec::OpusFrameEncoder;
use ncs_client::recorder::MicrophoneRecorder;
use ncs_client::{AppConfig, CancelSignal, ConfigManager, DiceRoll, Interpretation, Message, RollOutcome, WebSocketTransport};

const DEFAULT_CONCEPT_DATA_FILE: &str = "dynamic_list.sample.json";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let matches = Command::new("ncs-client")
        .version("0.1.0")
        .about("Speech recognition and natural language understanding over WebSocket")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file (.toml, or .json credentials)")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true)
        )
        .arg(
            Arg::new("user-id")
                .long("user-id")
                .short('u')
                .value_name("USER_ID")
                .help("User identifier sent on connect")
                .global(true)
        )
        .subcommand(Command::new("audio").about("Record from the microphone and interpret speech"))
        .subcommand(
            Command::new("text")
                .about("Interpret a sentence")
                .arg(Arg::new("sentence").required(true).num_args(1..))
        )
        .subcommand(
            Command::new("roll")
                .about("Roll dice described by voice, or by a sentence when one is given")
                .arg(Arg::new("sentence").num_args(1..))
        )
        .subcommand(
            Command::new("data-upload")
                .about("Upload dynamic list data for a concept")
                .arg(Arg::new("concept_id").required(true))
                .arg(
                    Arg::new("concept_data_file")
                        .value_parser(clap::value_parser!(PathBuf))
                        .default_value(DEFAULT_CONCEPT_DATA_FILE)
                )
        )
        .subcommand(Command::new("data-wipe").about("Delete the user's dynamic list data"))
        .subcommand(Command::new("init-config").about("Write a configuration template"))
        .get_matches();

    // Global arguments are propagated into the subcommand's matches
    let (command, args) = matches.subcommand().context("a subcommand is required")?;
    let config_path = args.get_one::<PathBuf>("config").cloned();

    if command == "init-config" {
        let path = match config_path {
            Some(path) => path,
            None => ConfigManager::default_config_path()?,
        };
        if ConfigManager::write_template(&path)? {
            println!("Configuration template written to {}", path.display());
        } else {
            println!("Configuration already exists at {}", path.display());
        }
        return Ok(());
    }

    let manager = ConfigManager::load(config_path)?;
    let config = manager.get_config();
    let user_id = args.get_one::<String>("user-id").map(String::as_str);
    let settings = config.to_request_settings(user_id);
    let transport = WebSocketTransport::new(config.to_transport_config());

    match command {
        "audio" => run_audio(&transport, &settings, config).await?,
        "text" => run_text(&transport, &settings, args).await?,
        "roll" => run_roll(&transport, &settings, config, args).await?,
        "data-upload" => run_upload(&transport, &settings, args).await?,
        "data-wipe" => {
            let reply = client::wipe_concept_data(&transport, &settings).await?;
            print_outcome(&reply);
        }
        other => bail!("unknown command: {}", other),
    }

    Ok(())
}

fn sentence_arg(args: &ArgMatches) -> Option<String> {
    args.get_many::<String>("sentence")
        .map(|words| words.cloned().collect::<Vec<_>>().join(" "))
}

async fn run_text(transport: &WebSocketTransport, settings: &RequestSettings, args: &ArgMatches) -> Result<()> {
    let sentence = sentence_arg(args).unwrap_or_default();
    let reply = client::understand_text(transport, settings, &sentence).await?;
    print_outcome(&reply);
    Ok(())
}

async fn run_audio(transport: &WebSocketTransport, settings: &RequestSettings, config: &AppConfig) -> Result<()> {
    let reply = record_and_understand(transport, settings, config).await?;
    print_outcome(&reply);
    Ok(())
}

async fn run_roll(
    transport: &WebSocketTransport,
    settings: &RequestSettings,
    config: &AppConfig,
    args: &ArgMatches,
) -> Result<()> {
    let reply = match sentence_arg(args) {
        Some(sentence) => client::understand_text(transport, settings, &sentence).await?,
        None => record_and_understand(transport, settings, config).await?,
    };

    let Some(interpretation) = Interpretation::from_message(&reply) else {
        print_outcome(&reply);
        bail!("the reply carried no interpretation to roll");
    };
    let request = DiceRoll::from_interpretation(&interpretation);
    let outcome = request.roll(&mut rand::thread_rng());
    print_roll(&request, &outcome);
    Ok(())
}

async fn record_and_understand(
    transport: &WebSocketTransport,
    settings: &RequestSettings,
    config: &AppConfig,
) -> Result<Message> {
    let mut recorder = MicrophoneRecorder::open(&config.to_recorder_settings())
        .context("Failed to open the microphone")?;
    let opus_config = config.to_opus_config(recorder.format().sample_rate);
    let mut encoder = OpusFrameEncoder::new(opus_config)
        .context("Failed to create the audio encoder")?;

    let cancel = CancelSignal::new();
    let listener = tokio::spawn(wait_for_stop(cancel.clone()));

    println!("Recording... press Enter or Ctrl+C to stop.");
    let outcome = client::understand_audio(transport, settings, &mut recorder, &mut encoder, &cancel).await;
    cancel.cancel();
    listener.abort();

    let outcome = outcome?;
    info!(
        "Sent {} packets ({} bytes), discarded {} bytes",
        outcome.stats.packets_sent, outcome.stats.bytes_sent, outcome.stats.discarded_bytes
    );
    Ok(outcome.message)
}

async fn run_upload(transport: &WebSocketTransport, settings: &RequestSettings, args: &ArgMatches) -> Result<()> {
    let concept_id = args
        .get_one::<String>("concept_id")
        .context("concept_id is required")?;
    let data_file = args
        .get_one::<PathBuf>("concept_data_file")
        .context("concept data file is required")?;

    let items = read_concept_data(data_file)?;
    info!("Uploading {} items for concept {}", items.len(), concept_id);

    let reply = client::upload_concept_data(transport, settings, concept_id, &items).await?;
    print_outcome(&reply);
    Ok(())
}

fn read_concept_data(path: &Path) -> Result<Vec<serde_json::Value>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read concept data file {:?}", path))?;
    let document = serde_json::from_str(&contents)
        .with_context(|| format!("Concept data file {:?} is not valid JSON", path))?;
    Ok(client::parse_concept_data(document)?)
}

/// Raise `cancel` on Enter or Ctrl+C
async fn wait_for_stop(cancel: CancelSignal) {
    let (enter_tx, mut enter_rx) = tokio::sync::oneshot::channel();
    // stdin reads block; keep them off the runtime.
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = enter_tx.send(());
    });

    tokio::select! {
        _ = &mut enter_rx => info!("Enter pressed, stopping recording"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Ctrl+C received, stopping recording"),
            Err(e) => {
                warn!("Failed to listen for Ctrl+C: {}", e);
                let _ = enter_rx.await;
            }
        },
    }
    cancel.cancel();
}

fn print_outcome(reply: &Message) {
    println!("Result: {}", reply.kind());
    match Interpretation::from_message(reply) {
        Some(interpretation) => {
            println!("Intent: {}", interpretation.intent.as_deref().unwrap_or("<none>"));
            if let Some(confidence) = interpretation.confidence {
                println!("Confidence: {:.3}", confidence);
            }
            if let Some(literal) = &interpretation.literal {
                println!("Literal: {}", literal);
            }
            for name in interpretation.concept_names() {
                let value = interpretation
                    .concept_value(&[name])
                    .unwrap_or_else(|| "<group>".to_string());
                println!("  {} = {}", name, value);
            }
        }
        None => {
            if let Some(status) = reply.pointer("/result_type") {
                println!("Result type: {}", status);
            }
        }
    }
}

fn print_roll(request: &DiceRoll, outcome: &RollOutcome) {
    println!("Rolling {} d{}", request.count, request.sides);
    let mut running = 0i64;
    for (index, roll) in outcome.rolls.iter().enumerate() {
        running += i64::from(*roll);
        println!("Roll {}: {} | Total: {}", index + 1, roll, running);
    }
    if let Some((operator, modifier)) = outcome.applied {
        println!("Applying {} {}", operator, modifier);
    }
    println!("Final result: {}", outcome.total);
    match request.confidence {
        Some(confidence) => println!("Confidence: {:.3}", confidence),
        None => println!("Confidence: <none>"),
    }
}
