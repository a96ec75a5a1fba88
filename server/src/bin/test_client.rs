use clap::Parser;
use shared::handshake;
use shared::{
    client_key, encode_masked_text, ClientMessage, FrameDecoder, Opcode, ServerMessage,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep_until, Instant};

/// Headless lobby client for poking at a running server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: String,
    /// Nickname sent with join
    #[clap(short, long, default_value = "bot")]
    nick: String,
    /// Optional chat line sent after joining
    #[clap(short, long)]
    chat: Option<String>,
    /// Seconds to stay connected
    #[clap(short, long, default_value = "30")]
    duration: u64,
}

async fn send_message(
    stream: &mut TcpStream,
    message: &ClientMessage,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = message.to_json()?;
    let frame = encode_masked_text(&json, rand::random())?;
    stream.write_all(&frame).await?;
    println!("-> {}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {}", args.server);

    // Upgrade
    let key = client_key(&rand::random());
    stream
        .write_all(handshake::client_request(&args.server, &key).as_bytes())
        .await?;

    let mut buf = [0u8; 4096];
    let mut response = Vec::new();
    let head_len = loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err("server closed the connection during the handshake".into());
        }
        response.extend_from_slice(&buf[..n]);
        if let Some(head_len) = handshake::verify_response(&response, &key)? {
            break head_len;
        }
    };
    println!("Handshake complete");

    let mut decoder = FrameDecoder::client();
    decoder.push(&response[head_len..]);

    let join = ClientMessage::parse(&serde_json::json!({
        "type": "join",
        "payload": { "nick": args.nick }
    })
    .to_string())?;
    send_message(&mut stream, &join).await?;

    if let Some(text) = &args.chat {
        let chat = ClientMessage::parse(&serde_json::json!({
            "type": "chat",
            "payload": { "text": text }
        })
        .to_string())?;
        send_message(&mut stream, &chat).await?;
    }

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    loop {
        while let Some(frame) = decoder.next_frame()? {
            match frame.opcode {
                Opcode::Text => match frame.text().map(ServerMessage::parse) {
                    Some(Ok(message)) => println!("<- {:?}", message),
                    Some(Err(e)) => println!("<- unparsed message: {}", e),
                    None => println!("<- invalid UTF-8 text frame"),
                },
                Opcode::Close => {
                    println!("Server closed the connection");
                    return Ok(());
                }
                other => println!("<- {:?} frame", other),
            }
        }

        tokio::select! {
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    println!("Connection closed");
                    return Ok(());
                }
                decoder.push(&buf[..n]);
            }
            _ = sleep_until(deadline) => break,
        }
    }

    // Close handshake, masked with an empty payload
    let mut close = vec![0x88, 0x80];
    close.extend_from_slice(&rand::random::<[u8; 4]>());
    stream.write_all(&close).await?;
    println!("Disconnected");

    Ok(())
}
