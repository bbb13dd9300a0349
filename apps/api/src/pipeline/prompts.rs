// Prompt templates for the resume analysis pipeline.
// Placeholders are `{name}` and are filled by llm_client::prompts::render_template.

/// Stage 1 template. Replace: {resume_content}
pub const FORMAT_MARKDOWN_TEMPLATE: &str = r#"###
{resume_content}
###

Rewrite the resume above in markdown.

Rules:
- Allowed top-level sections, written as h2 headings: Work Experience, Education, Summary, Skills, Certifications, Projects.
- Use h3 or lower for anything nested inside a section.
- Map every other top-level section onto the closest allowed heading, e.g.
  "Employment" => Work Experience
  "Tools and Technologies" => Skills
- Keep every fact from the original; do not invent anything."#;

/// Stage 2 template. Replace: {markdown}
pub const WORK_EXPERIENCE_TEMPLATE: &str = r#"###
{markdown}
###

From the Work Experience section above, work out step by step how long the candidate spent at each company and which skills and industries each role involved.
Skills are programming languages, frameworks, tools and similar; industries are domains such as healthcare, finance or retail.

Answer with one block per company in exactly this format:
"""
Company: Company1 (May 2000 - June 2005)
Duration: 5 years and 1 month
Skills: s1, s2, s3
Industry: h1, h2, h3
""""#;

/// Stage 3 template. Replace: {work_experience}, {json_schema}
pub const EXPERIENCE_JSON_TEMPLATE: &str = r#""""
{work_experience}
"""

Rewrite the breakdown above as a single JSON object with the keys "Skill Wise Experience" and "Industry Wise Experience". Both keys hold arrays of objects shaped like this example:

```json
{json_schema}
```

The example shows one element per array; include as many as the breakdown supports, always with the same keys."#;

/// Example object handed to stage 3 as `json_schema`.
pub fn experience_json_schema() -> String {
    serde_json::json!({
        "Skill Wise Experience": [
            {
                "Skill Name": "<skill name>",
                "Total Experience (in years)": 1,
                "Breakdown": "x years (company a), y years (company b)"
            }
        ],
        "Industry Wise Experience": [
            {
                "Industry Name": "<industry name>",
                "Total Experience (in years)": 3,
                "Breakdown": "x years (company a)"
            }
        ]
    })
    .to_string()
}
