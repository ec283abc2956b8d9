use base64::Engine as _;
use color_eyre::eyre::{eyre, Result};
use rand::{rngs::OsRng, RngCore as _};

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // tower-cookies needs at least 64 bytes of key material for private cookies
    let mut key = [0u8; 64];
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|e| eyre!("Failed to read from the OS entropy source: {}", e))?;

    let key_string = base64::engine::general_purpose::STANDARD.encode(key);

    println!("Generated session cookie key:");
    println!("{}", key_string);
    println!();
    println!("You can use this key as your COOKIE_KEY environment variable.");
    println!("For example, add the following to your .env file:");
    println!("COOKIE_KEY=\"{}\"", key_string);

    Ok(())
}
