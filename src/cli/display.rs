use console::{Style, style};

use crate::pipeline::Decision;
use crate::proposal::{ProposalStatus, RoutingProposal};
use crate::queue::MetricsSnapshot;

pub struct Display;

impl Display {
    pub fn new() -> Self {
        Self
    }

    pub fn print_header(&self, text: &str) {
        println!();
        println!("{}", style(text).bold().cyan());
        println!("{}", style("═".repeat(60)).dim());
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", style("error:").bold().red(), message);
    }

    pub fn print_message(&self, message: &str) {
        println!("{}", message);
    }

    pub fn print_decision(&self, decision: &Decision) {
        self.print_header(&format!(
            "Decision for {}/{}",
            decision.board_id, decision.item_id
        ));

        if !decision.normalization_errors.is_empty() {
            println!("{}", style("Normalization errors:").bold().yellow());
            for error in &decision.normalization_errors {
                let marker = if error.required { "required" } else { "optional" };
                println!(
                    "  {} {} ({}, expected {}): {}",
                    style("✗").red(),
                    error.field_id,
                    marker,
                    error.expected.name(),
                    error.reason
                );
            }
            println!();
        }

        if decision.blocked {
            println!(
                "{}",
                style("Blocked: required fields failed normalization; rules not evaluated").red()
            );
            return;
        }

        println!("{}", style("Values:").bold());
        for (field_id, value) in &decision.normalized_values {
            println!("  {} = {}", style(field_id).dim(), value);
        }
        println!();

        println!("{}", style("Rules:").bold());
        for explain in &decision.explains {
            let marker = if explain.matched {
                style("✓").green()
            } else {
                style("✗").dim()
            };
            println!(
                "  {} [{}] {}",
                marker,
                explain.priority,
                style(&explain.name).white()
            );
            for cond in &explain.conditions {
                let verdict = if cond.passed {
                    style("pass").green()
                } else {
                    style("fail").red()
                };
                println!(
                    "      {} {} {} {:?} (actual: {})",
                    verdict, cond.field_id, cond.op, cond.expected, cond.actual
                );
            }
        }
        println!();

        match (&decision.selected_rule, &decision.assignee) {
            (Some(rule), Some(assignee)) => {
                println!(
                    "Selected: {} {} {}",
                    style(&rule.name).bold().green(),
                    style("→").dim(),
                    style(assignee).bold()
                );
            }
            (Some(rule), None) => {
                println!(
                    "Selected: {} {}",
                    style(&rule.name).bold().green(),
                    style("(no assignable agent)").red()
                );
            }
            _ => println!("{}", style("No rule matched").yellow()),
        }

        if !decision.ranking.is_empty() {
            println!();
            println!("{}", style("Agent ranking:").bold());
            for (i, score) in decision.ranking.iter().take(5).enumerate() {
                println!(
                    "  {}. {} {}",
                    i + 1,
                    style(&score.agent_id).white(),
                    style(format!("{:.2}", score.total)).bold()
                );
            }
        }
    }

    pub fn print_proposal_summary(&self, proposal: &RoutingProposal) {
        println!(
            "{}  {}/{}  {}  {}",
            style(&proposal.id).bold(),
            proposal.board_id,
            proposal.item_id,
            self.status_style(proposal.status)
                .apply_to(proposal.status.to_string()),
            style(&proposal.assignee).dim()
        );
    }

    pub fn print_proposal_detail(&self, proposal: &RoutingProposal) {
        self.print_header(&format!("Proposal {}", proposal.id));
        println!("Item:       {}/{}", proposal.board_id, proposal.item_id);
        println!(
            "Status:     {}",
            self.status_style(proposal.status)
                .apply_to(proposal.status.to_string())
        );
        println!("Assignee:   {}", style(&proposal.assignee).bold());
        if let Some(rule) = &proposal.selected_rule {
            println!("Rule:       {} (priority {})", rule.name, rule.priority);
        }
        println!("Key:        {}", style(&proposal.idempotency_key).dim());
        println!("Created:    {}", proposal.created_at.to_rfc3339());
        if let Some(decided_at) = proposal.decided_at {
            println!("Decided:    {}", decided_at.to_rfc3339());
        }

        if !proposal.explains.ranking.is_empty() {
            println!();
            println!("{}", style("Agent ranking:").bold());
            for (i, score) in proposal.explains.ranking.iter().take(5).enumerate() {
                println!("  {}. {} {:.2}", i + 1, score.agent_id, score.total);
            }
        }
    }

    pub fn print_metrics(&self, metrics: &MetricsSnapshot) {
        self.print_header("Write queue");
        println!("Total:          {}", metrics.total_requests);
        println!("Successful:     {}", metrics.successful_requests);
        println!("Failed:         {}", metrics.failed_requests);
        println!("Retried:        {}", metrics.retried_requests);
        println!("Queue depth:    {}", metrics.queue_size);
        println!("Avg wait:       {:.0} ms", metrics.average_wait_ms);
        println!("Last 60s:       {}", metrics.requests_per_minute);
    }

    fn status_style(&self, status: ProposalStatus) -> Style {
        match status {
            ProposalStatus::Proposed => Style::new().yellow(),
            ProposalStatus::Approved => Style::new().cyan(),
            ProposalStatus::Rejected => Style::new().red(),
            ProposalStatus::Overridden => Style::new().magenta(),
            ProposalStatus::Applied => Style::new().green(),
        }
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}
