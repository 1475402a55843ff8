// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Prompt text handed to an agent session.

use crate::fleet::types::RepoTask;

/// System prompt for the API backend.
pub const SYSTEM_PROMPT: &str = "You are an autonomous software engineer working inside a single \
repository. Use the provided tools to inspect and change files. Paths are relative to the \
repository root. Only allow-listed programs can be run, and no shell is involved. When the task \
is complete, stage and commit your changes with git and reply with a short summary.";

/// Render the task as the first user message of a session.
pub fn build_prompt(task: &RepoTask) -> String {
    let mut prompt = format!(
        "# Task {id}: {title}\n\nRepository: {repo}\nPriority: {priority}\n",
        id = task.task_id,
        title = task.task_title,
        repo = task.repo_name,
        priority = task.priority,
    );

    if !task.phase.trim().is_empty() {
        prompt.push_str(&format!("Phase: {}\n", task.phase.trim()));
    }

    if !task.context.trim().is_empty() {
        prompt.push_str("\n## Context\n\n");
        prompt.push_str(task.context.trim());
        prompt.push('\n');
    }

    prompt.push_str(
        "\n## Instructions\n\n\
         Implement this task in the repository. Follow the existing conventions and keep the \
         change focused. When you are done, commit the result with git using a message that \
         references the task id.\n",
    );
    prompt
}
