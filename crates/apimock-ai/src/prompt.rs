//! Prompt text for mock generation.

use apimock_core::template::META_PREFIX;

pub const SYSTEM_PROMPT: &str = "\
You are an API mock data generator. Given a JSON response template with \
field annotations, you produce one realistic, internally consistent sample \
response that follows the template's structure exactly.

Respond ONLY with JSON. No markdown fences, no comments, no explanation.";

/// Build the user instruction around a template whose annotations have been
/// condensed to `/* xs:<type>, note:<description> */` hints.
pub fn build_instruction(hinted_template: &str) -> String {
    format!(
        "Generate realistic mock data for this annotated JSON response template:\n\
         \n\
         {hinted_template}\n\
         \n\
         Annotation format: /* xs:<type>, note:<description> */ next to a field.\n\
         - xs is the field's data type (integer, string, object, array, ...)\n\
         - note describes the field's business meaning\n\
         \n\
         Rules:\n\
         1. Keep exactly the structure of the template: same keys, same nesting, same order.\n\
         2. Give every field a value whose type matches its xs type or its sample value.\n\
         3. Use the note to pick values that make sense for the business meaning.\n\
         4. Ignore every field whose key starts with '{META_PREFIX}'.\n\
         5. For arrays, produce 1 to 3 realistic items.\n\
         6. Keep ResponseStatus, ErrorCode and ErrorModule at their success defaults.\n\
         7. Strings must be meaningful for the field name, not random text.\n\
         8. Return only valid JSON that parses as-is."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_embeds_template_and_rules() {
        let text = build_instruction(r#"{"Name": "" /* xs:string, note:device name */}"#);
        assert!(text.contains("/* xs:string, note:device name */"));
        assert!(text.contains("starts with '@'"));
        assert!(text.contains("Return only valid JSON"));
    }
}
