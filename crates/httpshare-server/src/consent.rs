use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// One upload waiting for the operator's decision.
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub requester: String,
    pub destination: PathBuf,
    /// The destination already exists and would be replaced.
    pub overwrite: bool,
}

struct Pending {
    request: ConsentRequest,
    reply: oneshot::Sender<bool>,
}

/// Serialises upload prompts onto a single console.
///
/// A dedicated thread owns the console and answers queued requests one at a
/// time, so concurrent uploads never interleave their prompts. Handlers only
/// enqueue and await. A blocked read stalls later prompts but no other
/// requests.
#[derive(Clone)]
pub struct ConsentDesk {
    tx: mpsc::UnboundedSender<Pending>,
}

impl ConsentDesk {
    /// Desk prompting on stdout and reading answers from stdin.
    pub fn console() -> io::Result<Self> {
        Self::spawn(BufReader::new(io::stdin()), io::stdout())
    }

    pub fn spawn<R, W>(input: R, output: W) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("consent-desk".into())
            .spawn(move || serve(rx, input, output))?;
        Ok(Self { tx })
    }

    /// Ask the operator. Any failure to get an answer counts as refusal.
    pub async fn ask(&self, request: ConsentRequest) -> bool {
        let (reply, answer) = oneshot::channel();
        if self.tx.send(Pending { request, reply }).is_err() {
            warn!("consent desk is gone, refusing upload");
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

fn serve<R: BufRead, W: Write>(
    mut rx: mpsc::UnboundedReceiver<Pending>,
    mut input: R,
    mut output: W,
) {
    while let Some(Pending { request, reply }) = rx.blocking_recv() {
        let accepted = prompt(&mut input, &mut output, &request);
        if reply.send(accepted).is_err() {
            debug!(destination = %request.destination.display(), "uploader left before consent was given");
        }
    }
}

/// Print one prompt and read one line. EOF and read errors are refusals.
pub fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, request: &ConsentRequest) -> bool {
    if let Err(e) = write_prompt(output, request) {
        warn!(error = %e, "could not write consent prompt, assuming refusal");
        return false;
    }
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) => {
            warn!("console closed while waiting for consent, assuming refusal");
            false
        }
        Ok(_) => is_affirmative(&line),
        Err(e) => {
            warn!(error = %e, "error reading consent from console, assuming refusal");
            false
        }
    }
}

fn write_prompt<W: Write>(output: &mut W, request: &ConsentRequest) -> io::Result<()> {
    writeln!(output, "\n*******************")?;
    if request.overwrite {
        writeln!(
            output,
            "Warning: file \"{}\" already exists and will be overwritten if you accept.",
            request.destination.display()
        )?;
    }
    write!(
        output,
        "Upload requested by {}. Accept file {}? (y/N) ",
        request.requester,
        request.destination.display()
    )?;
    output.flush()
}

pub fn is_affirmative(line: &str) -> bool {
    matches!(line.trim_end_matches(['\r', '\n']), "y" | "Y")
}
