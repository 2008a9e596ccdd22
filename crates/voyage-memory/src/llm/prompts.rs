//! Prompt templates for the language model collaborator

/// System prompt for importance estimation
pub const IMPORTANCE_SYSTEM: &str = "你是消息重要性分析助手";

/// Importance estimation prompt. Placeholder: {message}
pub const IMPORTANCE_PROMPT: &str = r#"分析以下用户消息的重要性分数（0-1）：

消息：{message}

请判断这条消息对理解用户旅行偏好和需求的帮助程度。
只返回分数，不要其他内容。"#;

/// System prompt for dialogue summaries
pub const SUMMARY_SYSTEM: &str = "你是对话摘要专家";

/// Dialogue summary prompt. Placeholders: {target_length}, {conversation}, {instruction}
pub const SUMMARY_PROMPT: &str = r#"请将以下对话压缩为{target_length}的摘要：

{conversation}

要求：
- {instruction}
- 保留用户偏好、目的地、预算、时间等关键信息
- 摘要用中文
- 只返回摘要内容，不要其他内容"#;

/// System prompt for cluster summaries
pub const CONSOLIDATION_SYSTEM: &str = "你是记忆整合专家";

/// Cluster summary prompt. Placeholders: {topic}, {memories}
pub const CONSOLIDATION_PROMPT: &str = r#"以下是关于"{topic}"主题的多个记忆片段，请合并为一个简洁摘要：

{memories}

合并摘要（100字以内）："#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_present() {
        assert!(IMPORTANCE_PROMPT.contains("{message}"));
        assert!(SUMMARY_PROMPT.contains("{target_length}"));
        assert!(SUMMARY_PROMPT.contains("{conversation}"));
        assert!(SUMMARY_PROMPT.contains("{instruction}"));
        assert!(CONSOLIDATION_PROMPT.contains("{topic}"));
        assert!(CONSOLIDATION_PROMPT.contains("{memories}"));
    }
}
