use crate::opts::ConnectionArgs;
use clap::Parser;
use eyre::Result;

#[derive(Parser, Debug)]
pub struct EventsArgs {
    /// Index of the first event
    #[arg(long, default_value_t = 0)]
    start: u64,

    /// Number of events, at most 100 per call
    #[arg(long, default_value_t = 100)]
    length: u64,
}

impl EventsArgs {
    pub async fn run(self, conn: &ConnectionArgs) -> Result<()> {
        let result = conn.client()?.get_events(self.start, self.length).await?;
        for (index, event) in (self.start..).zip(&result.events) {
            println!("{index:>6} {} {}", event.timestamp, serde_json::to_string(&event.payload)?);
        }
        println!(
            "{} of {} events",
            result.events.len(),
            result.total_event_count
        );
        Ok(())
    }
}
