use argh::FromArgs;
use reqwest::multipart::{Form, Part};
use std::path::PathBuf;

mod messages;

// defaults for the client
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 3000;

#[derive(FromArgs)]
/// Client for exercising a running FatSecret proxy
struct ClientArgs {
    /// the host to connect to
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to connect to
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// command to execute: "health", "recognize" or "token-status"
    #[argh(subcommand)]
    command: ClientCommands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum ClientCommands {
    Health(HealthCommand),
    Recognize(RecognizeCommand),
    TokenStatus(TokenStatusCommand),
}

#[derive(FromArgs)]
/// Check that the proxy is up
#[argh(subcommand, name = "health")]
struct HealthCommand {}

#[derive(FromArgs)]
/// Upload an image for food recognition
#[argh(subcommand, name = "recognize")]
struct RecognizeCommand {
    /// the path to the image
    #[argh(option, short = 'i')]
    image_path: PathBuf,

    /// region code sent upstream, e.g. US
    #[argh(option)]
    region: Option<String>,

    /// language code sent upstream, e.g. en
    #[argh(option)]
    language: Option<String>,
}

#[derive(FromArgs)]
/// Show the cached token state
#[argh(subcommand, name = "token-status")]
struct TokenStatusCommand {}

async fn print_response(response: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = response.status();
    let body = response.json::<serde_json::Value>().await?;

    if status.is_success() {
        println!("Result: {}", serde_json::to_string_pretty(&body)?);
    } else {
        let error: messages::ErrorResponse = serde_json::from_value(body)?;
        println!("Error ({status}): {} - {}", error.error, error.message);
        if let Some(details) = error.details {
            println!("Details: {}", serde_json::to_string_pretty(&details)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: ClientArgs = argh::from_env();

    let client = reqwest::Client::new();

    // format the host and port
    let addr = format!("{}:{}", args.host, args.port);

    match args.command {
        ClientCommands::Health(_) => {
            let health = client
                .get(format!("http://{}/health", addr))
                .send()
                .await?
                .json::<messages::HealthResponse>()
                .await?;

            println!("{} is {} at {}", health.service, health.status, health.timestamp);
        }
        ClientCommands::Recognize(command) => {
            let bytes = tokio::fs::read(&command.image_path).await?;
            let file_name = command
                .image_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("image.jpg")
                .to_string();

            let mut form = Form::new().part("image", Part::bytes(bytes).file_name(file_name));
            if let Some(region) = command.region {
                form = form.text("region", region);
            }
            if let Some(language) = command.language {
                form = form.text("language", language);
            }

            let response = client
                .post(format!("http://{}/api/recognize-food", addr))
                .multipart(form)
                .send()
                .await?;

            print_response(response).await?;
        }
        ClientCommands::TokenStatus(_) => {
            let response = client
                .get(format!("http://{}/api/token-status", addr))
                .send()
                .await?;

            if response.status().is_success() {
                let status = response.json::<messages::TokenStatusResponse>().await?;
                println!(
                    "Token cached: {}, expires in {} (at {})",
                    status.has_token, status.expires_in, status.expiry_time
                );
            } else {
                print_response(response).await?;
            }
        }
    }

    Ok(())
}
