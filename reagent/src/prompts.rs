//! Prompt templates for the agent strategies.
//!
//! Templates are plain strings with `{{placeholder}}` slots; rendering is
//! simple substitution, so templates can be swapped or edited without a
//! template engine dependency.

/// Planning prompt pair: first plan vs. mid-run update.
#[derive(Debug, Clone)]
pub struct PlanningTemplates {
    /// Rendered before the first action step.
    pub initial: String,
    /// Rendered when the plan is refreshed mid-run.
    pub update: String,
}

/// Templates framing a managed sub-agent's task and report.
#[derive(Debug, Clone)]
pub struct ManagedAgentTemplates {
    /// Wraps the task handed to the sub-agent.
    pub task: String,
    /// Wraps the sub-agent's answer for the manager.
    pub report: String,
}

/// Templates for the max-steps final-answer synthesis call.
#[derive(Debug, Clone)]
pub struct FinalAnswerTemplates {
    /// System prompt placed before the memory messages.
    pub pre_messages: String,
    /// User prompt placed after the memory messages.
    pub post_messages: String,
}

/// The full template set an agent renders from.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    /// The system prompt.
    pub system_prompt: String,
    /// Planning prompts.
    pub planning: PlanningTemplates,
    /// Managed-agent framing.
    pub managed_agent: ManagedAgentTemplates,
    /// Max-steps synthesis prompts.
    pub final_answer: FinalAnswerTemplates,
}

/// Substitute `{{key}}` placeholders in a template.
#[must_use]
pub fn render(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut rendered = template.to_owned();
    for (key, value) in substitutions {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
    }
    rendered
}

const TOOL_CALLING_SYSTEM_PROMPT: &str = "\
You are an expert assistant who can solve any task using tool calls. You will \
be given a task to solve as best you can.

To do so, you have been given access to these tools:
{{tool_descriptions}}
{{managed_agents_section}}
The tool call you write is an action: after the tool is executed, you will get \
the result of the tool call as an \"observation\".
This action/observation cycle can repeat several times; you should take several \
steps when needed.

You can use the result of a previous action as input for the next action. The \
observation will always be a string.

Here are the rules you should always follow to solve your task:
1. ALWAYS provide a tool call; otherwise you will fail.
2. Always use the right arguments for the tools. Never use variable names as \
arguments, use the values instead.
3. Call a tool only when needed: do not call tools you do not need, and never \
repeat a tool call with the exact same parameters.
4. Once you have gathered everything you need, call the `final_answer` tool \
with your answer.
{{custom_instructions}}
Now begin!";

const CODE_SYSTEM_PROMPT: &str = "\
You are an expert assistant who can solve any task using code. You will be \
given a task to solve as best you can.

To solve the task, you must plan forward in a cycle of Thought, Code, and \
Observation sequences.

At each step, in the Thought sequence, explain your reasoning towards solving \
the task. Then, write a single code block in the simple scripting language \
described below, opening with {{code_block_opening_tag}} and closing with \
{{code_block_closing_tag}}. During execution, anything you pass to `print` is \
captured and returned to you as an observation; use it to persist information \
you will need in the following steps. When you have the task's answer, call \
`final_answer(answer)` to finish.

The language supports: variables, `if`/`else`, `for x in xs { ... }`, `while` \
loops with `break`/`continue`, list and map literals, arithmetic and boolean \
operators, and calls. Builtins available: print, len, str, int, float, abs, \
min, max, sum, round, range, sorted, join, split, type, contains, append, \
keys, values. Statements end at the end of a line; blocks use braces.

You can also import these modules (and only these): {{authorized_imports}}. \
Use `import math` style imports, then `math.sqrt(x)` style calls.

On top of the builtins, you have access to these tools, which are ordinary \
functions called with keyword arguments only:
{{tool_descriptions}}
{{managed_agents_section}}
Here are the rules you should always follow to solve your task:
1. Always provide a Thought sequence and a single code block, else you will fail.
2. Use only variables that you have defined.
3. Call tools with keyword arguments, not positional: `web_search(query=\"...\")`.
4. Do not chain too many tool calls in one block when their outputs are hard \
to predict; print intermediate results and continue in the next step.
5. Call a tool only when needed, and never repeat an identical call.
6. Do not name variables after tools or builtins.
7. State persists between code blocks: variables and imports carry over.
{{custom_instructions}}
Now begin!";

const PLANNING_INITIAL: &str = "\
You are a world expert at analyzing a situation to derive facts, and planning \
accordingly towards solving a task.
Below I will present you a task. You will need to:
1. Build a survey of facts known or needed to solve the task.
2. Make a plan of action to solve the task.

## Facts survey
List the specific facts given in the task, facts to look up, and facts to \
derive.

## Plan
Develop a step-by-step high-level plan taking the above facts into account. \
This plan should involve individual tasks that, if executed correctly, will \
yield the correct answer. Do not skip steps, and do not add superfluous steps. \
After writing the final step of the plan, write '<end_plan>' and stop there.

Here is your task:
{{task}}";

const PLANNING_UPDATE: &str = "\
You are still working towards solving this task:
{{task}}

You have the history of attempts above. Based on it, update your facts survey \
and write a new plan for the remaining steps. You have {{remaining_steps}} \
steps left. Do not repeat steps that already succeeded. After writing the \
final step of the plan, write '<end_plan>' and stop there.";

const MANAGED_AGENT_TASK: &str = "\
You're a helpful agent named '{{name}}'.
You have been submitted this task by your manager.
---
Task:
{{task}}
---
You're helping your manager solve a wider task: so make sure to not provide a \
one-line answer, but give as much information as possible so that they have a \
clear understanding of the answer.

Your final_answer WILL HAVE to contain these parts:
### 1. Task outcome (short version):
### 2. Task outcome (extremely detailed version):
### 3. Additional context (if relevant):";

const MANAGED_AGENT_REPORT: &str = "\
Here is the final answer from your managed agent '{{name}}':
{{final_answer}}";

const FINAL_ANSWER_PRE: &str = "\
An agent tried to answer a user query but it got stuck and failed to do so. \
You are tasked with providing an answer instead. Here is the agent's memory:";

const FINAL_ANSWER_POST: &str = "\
Based on the above, please provide an answer to the following user task:
{{task}}";

impl PromptTemplates {
    /// Default templates for the tool-calling strategy.
    #[must_use]
    pub fn tool_calling_default() -> Self {
        Self {
            system_prompt: TOOL_CALLING_SYSTEM_PROMPT.to_owned(),
            planning: PlanningTemplates {
                initial: PLANNING_INITIAL.to_owned(),
                update: PLANNING_UPDATE.to_owned(),
            },
            managed_agent: ManagedAgentTemplates {
                task: MANAGED_AGENT_TASK.to_owned(),
                report: MANAGED_AGENT_REPORT.to_owned(),
            },
            final_answer: FinalAnswerTemplates {
                pre_messages: FINAL_ANSWER_PRE.to_owned(),
                post_messages: FINAL_ANSWER_POST.to_owned(),
            },
        }
    }

    /// Default templates for the code strategy.
    #[must_use]
    pub fn code_default() -> Self {
        Self {
            system_prompt: CODE_SYSTEM_PROMPT.to_owned(),
            ..Self::tool_calling_default()
        }
    }
}
