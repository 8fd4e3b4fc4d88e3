//! `parley budget` — dry-run the context window allocator.

use parley_context::{AllocationInput, BudgetAllocator, BudgetPlan};
use std::path::PathBuf;

pub fn run(
    window: usize,
    system_file: Option<PathBuf>,
    message: &str,
    history_file: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let system_prompt = super::read_system_prompt(system_file.as_ref())?;
    let mut history = super::read_history(history_file.as_ref())?;

    let plan = BudgetAllocator::heuristic().allocate(AllocationInput {
        window_size: window,
        system_prompt: &system_prompt,
        current_turn: message,
        memories: &[],
        history: &mut history,
    });

    print!("{}", render(&plan, history.len()));
    Ok(())
}

fn render(plan: &BudgetPlan, offered: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("Window:          {}\n", plan.window_size));
    out.push_str(&format!("System prompt:   {}\n", plan.system_tokens));
    out.push_str(&format!("Current turn:    {}\n", plan.current_tokens));
    out.push_str(&format!("Memories:        {}\n", plan.memory_tokens));
    out.push_str(&format!("History budget:  {}\n", plan.history_budget));
    out.push_str(&format!(
        "History used:    {} ({} of {} entries kept)\n",
        plan.history_tokens,
        plan.history.len(),
        offered
    ));
    out.push_str(&format!("Total:           {}\n", plan.total_tokens()));
    if plan.is_degraded() {
        out.push_str(&format!(
            "Over budget by {} tokens; history omitted\n",
            plan.overflow_tokens
        ));
    }
    out
}
