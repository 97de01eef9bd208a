//! Terminal output for the `farmout` binary: colored activity lines and an
//! offer countdown spinner.
//!
//! Uses `console` for styling and `indicatif` for the spinner.

use std::fmt::Display;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use farmout::activity::ActivityLogEntry;
use farmout::dispatch::OfferCountdown;
use farmout::state_machine::Reservation;
use farmout::status::{CanonicalStatus, FarmoutMode, FarmoutStatus, format_status_label};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Good,
    Bad,
    Waiting,
    Pending,
    Quiet,
}

/// Color family for an entry that moved a reservation into `to`.
fn tone_for(to: Option<FarmoutStatus>) -> Tone {
    match to {
        Some(FarmoutStatus::Offered) => Tone::Pending,
        Some(FarmoutStatus::Unassigned) => Tone::Waiting,
        Some(
            FarmoutStatus::Declined | FarmoutStatus::Cancelled | FarmoutStatus::NoShow,
        ) => Tone::Bad,
        Some(_) => Tone::Good,
        None => Tone::Quiet,
    }
}

/// Styled printer for activity and reservation summaries.
pub struct DispatchConsole {
    green: Style,
    red: Style,
    yellow: Style,
    cyan: Style,
    dim: Style,
}

impl DispatchConsole {
    pub fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            cyan: Style::new().cyan(),
            dim: Style::new().dim(),
        }
    }

    fn style(&self, tone: Tone) -> &Style {
        match tone {
            Tone::Good => &self.green,
            Tone::Bad => &self.red,
            Tone::Waiting => &self.yellow,
            Tone::Pending => &self.cyan,
            Tone::Quiet => &self.dim,
        }
    }

    pub fn heading(&self, title: &str) {
        println!();
        println!("{}", self.cyan.apply_to(format!("─── {title} ───")));
    }

    /// One activity entry. Notes are dimmed; transitions are colored by
    /// where they landed.
    pub fn entry(&self, entry: &ActivityLogEntry) {
        let tone = entry
            .transition
            .map_or(Tone::Quiet, |transition| tone_for(transition.to));
        println!(
            "  {} {} {}",
            self.dim.apply_to(entry.timestamp.format("%H:%M:%S%.3f")),
            self.dim.apply_to(format!("[{}]", entry.reservation_id)),
            self.style(tone).apply_to(&entry.message)
        );
    }

    pub fn reservation(&self, reservation: &Reservation) {
        let status = format_status_label(&reservation.farmout_status.into());
        let status = if status.is_empty() { "In-house".to_string() } else { status };
        let tone = tone_for(reservation.farmout_status);
        let assignment = match reservation.assignment() {
            Some(a) => format!("driver {} / vehicle {}", a.driver_id, a.vehicle_id),
            None => "no assignment".to_string(),
        };
        let offer = match &reservation.current_offer {
            Some(o) => format!(", offer to {} until {}", o.driver_id, o.expires_at.format("%H:%M:%S")),
            None => String::new(),
        };
        println!(
            "  {:<8} {:<20} {:<10} {assignment}{offer}",
            reservation.id,
            self.style(tone).apply_to(status),
            reservation.farmout_mode.to_string(),
        );
    }

    /// Full activity trail of one reservation as JSON.
    pub fn audit(&self, reservation_id: &str, entries: &[ActivityLogEntry]) {
        self.heading(&format!("audit trail {reservation_id}"));
        println!("{}", serde_json::to_string_pretty(entries).unwrap_or_default());
    }

    pub fn canonical_status(&self, raw: &str, canonical: &CanonicalStatus) {
        let styled = match canonical {
            CanonicalStatus::Empty => self.dim.apply_to("(not farmed out)".to_string()),
            CanonicalStatus::Known(_) => self.green.apply_to(format!(
                "{canonical} ({})",
                format_status_label(canonical)
            )),
            CanonicalStatus::Unrecognized(_) => {
                self.yellow.apply_to(format!("{canonical} (unrecognized)"))
            }
        };
        println!("  {raw:?} -> {styled}");
    }

    pub fn canonical_mode(&self, raw: &str, mode: FarmoutMode) {
        println!("  {raw:?} -> {}", self.green.apply_to(mode));
    }

    /// A rejected command, shown without aborting the run.
    pub fn rejected(&self, action: &str, err: &dyn Display) {
        println!("  {} {action}: {err}", self.red.apply_to("✗"));
    }

    pub fn accepted(&self, action: &str) {
        println!("  {} {action}", self.green.apply_to("✓"));
    }
}

/// Spinner that follows an offer until it is resolved or expires.
pub struct CountdownSpinner {
    pb: ProgressBar,
}

impl CountdownSpinner {
    pub fn start(countdown: &OfferCountdown) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(100));
        let spinner = Self { pb };
        spinner.update(countdown);
        spinner
    }

    pub fn update(&self, countdown: &OfferCountdown) {
        self.pb.set_message(format!(
            "{}: offer to {} expires in {:.1}s",
            countdown.reservation_id,
            countdown.driver_id,
            countdown.remaining.as_secs_f64()
        ));
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tones_follow_destination() {
        assert_eq!(tone_for(Some(FarmoutStatus::Offered)), Tone::Pending);
        assert_eq!(tone_for(Some(FarmoutStatus::Unassigned)), Tone::Waiting);
        assert_eq!(tone_for(Some(FarmoutStatus::NoShow)), Tone::Bad);
        assert_eq!(tone_for(Some(FarmoutStatus::PassengerOnboard)), Tone::Good);
        assert_eq!(tone_for(None), Tone::Quiet);
    }
}
