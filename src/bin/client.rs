use argh::FromArgs;
use reqwest::multipart::{Form, Part};
use std::path::PathBuf;

// defaults for the client
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8000;

#[derive(FromArgs)]
/// Client for probing the service and running requests against it
struct ClientArgs {
    /// the host to connect to
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to connect to
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// command to execute: "health", "status" or "process"
    #[argh(subcommand)]
    command: ClientCommands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum ClientCommands {
    Health(HealthCommand),
    Status(StatusCommand),
    Process(ProcessCommand),
}

#[derive(FromArgs)]
/// Check whether the service is up and the model is loaded
#[argh(subcommand, name = "health")]
struct HealthCommand {}

#[derive(FromArgs)]
/// Show the full service status
#[argh(subcommand, name = "status")]
struct StatusCommand {}

#[derive(FromArgs)]
/// Send an image and a prompt for processing
#[argh(subcommand, name = "process")]
struct ProcessCommand {
    /// the path to the image
    #[argh(option, short = 'i')]
    image_path: PathBuf,

    /// the prompt to use
    #[argh(option, short = 't')]
    text: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: ClientArgs = argh::from_env();

    let client = reqwest::Client::new();

    // format the host and port
    let addr = format!("{}:{}", args.host, args.port);

    let response = match args.command {
        ClientCommands::Health(_) => client.get(format!("http://{addr}/health")).send().await,
        ClientCommands::Status(_) => client.get(format!("http://{addr}/status")).send().await,
        ClientCommands::Process(command) => {
            let bytes = tokio::fs::read(&command.image_path).await?;
            let file_name = command
                .image_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("image")
                .to_string();
            let image = Part::bytes(bytes).file_name(file_name);
            let form = Form::new().text("text", command.text).part("image", image);

            client
                .post(format!("http://{addr}/process"))
                .multipart(form)
                .send()
                .await
        }
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            log::error!("Could not reach {addr}: {e}");
            if e.is_connect() {
                eprintln!("Connection to {addr} failed. Is the server running and the port exposed?");
            }
            return Err(e.into());
        }
    };

    let status = response.status();
    let result = response.json::<serde_json::Value>().await?;
    println!("Status: {status}");
    println!("Result: {}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
