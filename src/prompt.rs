//! Console registration for devices that are already online.

use crate::{
    error::RegistrationError,
    services::{
        registrar::{AccountIdentity, DeviceRegistrar},
        token_store::DeviceToken,
    },
};
use anyhow::{Context, Result, bail, ensure};
use log::{info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

pub const MAX_PROMPTS: u32 = 3;

pub struct IdentityPrompt<R, W> {
    lines: Lines<R>,
    output: W,
}

impl<R, W> IdentityPrompt<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            lines: input.lines(),
            output,
        }
    }

    pub async fn ask_identity(&mut self) -> Result<AccountIdentity> {
        Ok(AccountIdentity {
            email: self.ask("User Email :: ").await?,
            password: self.ask_verbatim("Password :: ").await?,
            device_name: self.ask("Desired Device Name :: ").await?,
        })
    }

    pub async fn tell(&mut self, message: &str) -> Result<()> {
        self.output
            .write_all(format!("{message}\n").as_bytes())
            .await
            .context("failed to write to console")?;
        self.output.flush().await.context("failed to flush console")
    }

    async fn ask(&mut self, question: &str) -> Result<String> {
        let answer = self.read_answer(question).await?.trim().to_string();

        ensure!(!answer.is_empty(), "empty answer to {:?}", question.trim());
        Ok(answer)
    }

    /// Like `ask`, but keeps surrounding whitespace, which is part of a password.
    async fn ask_verbatim(&mut self, question: &str) -> Result<String> {
        let answer = self.read_answer(question).await?;

        ensure!(!answer.is_empty(), "empty answer to {:?}", question.trim());
        Ok(answer)
    }

    /// Show `question` and read one line without its line ending.
    async fn read_answer(&mut self, question: &str) -> Result<String> {
        self.output
            .write_all(question.as_bytes())
            .await
            .context("failed to write to console")?;
        self.output.flush().await.context("failed to flush console")?;

        self.lines
            .next_line()
            .await
            .context("failed to read from console")?
            .context("console closed")
    }
}

/// Ask for an identity and register, asking again while the server rejects it.
pub async fn register_interactively<R, W>(
    registrar: &DeviceRegistrar,
    prompt: &mut IdentityPrompt<R, W>,
) -> Result<DeviceToken>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for round in 1..=MAX_PROMPTS {
        let identity = prompt.ask_identity().await?;

        match registrar.register(&identity).await {
            Ok(token) => {
                info!("registered after {round} prompt(s)");
                return Ok(token);
            }
            Err(RegistrationError::Rejected(message)) => {
                warn!("registration rejected: {message}");
                prompt.tell(&format!("ERROR :: {message}")).await?;
            }
            Err(e) => return Err(e).context("registration failed"),
        }
    }

    prompt
        .tell("The maximum number of registration attempts has been exceeded.")
        .await?;
    bail!("registration rejected {MAX_PROMPTS} times")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ask_identity_reads_three_answers() {
        let input: &[u8] = b" me@example.com \n  pw  \r\nkitchen\n";
        let mut output = Vec::new();
        let mut prompt = IdentityPrompt::new(input, &mut output);

        let identity = prompt.ask_identity().await.expect("should read identity");

        assert_eq!(
            identity,
            AccountIdentity {
                email: "me@example.com".to_string(),
                password: "  pw  ".to_string(),
                device_name: "kitchen".to_string(),
            }
        );
        drop(prompt);
        let shown = String::from_utf8(output).expect("should be utf8");
        assert!(shown.contains("User Email :: "));
        assert!(shown.contains("Desired Device Name :: "));
    }

    #[tokio::test]
    async fn test_closed_console_is_an_error() {
        let input: &[u8] = b"me@example.com\n";
        let mut prompt = IdentityPrompt::new(input, tokio::io::sink());

        assert!(prompt.ask_identity().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_answer_is_an_error() {
        let input: &[u8] = b"\n";
        let mut prompt = IdentityPrompt::new(input, tokio::io::sink());

        assert!(prompt.ask_identity().await.is_err());
    }
}
