use std::path::Path;

use anyhow::Result;

use crate::upload::{ExtensionMessage, ImageAttachment};

pub fn run(image: &Path) -> Result<()> {
    let image = ImageAttachment::from_path(image)?;
    let message = ExtensionMessage::image_selected(&image);
    println!("{}", serde_json::to_string(&message)?);
    Ok(())
}
