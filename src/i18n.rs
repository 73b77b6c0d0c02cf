use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

pub struct I18n {
    translations: HashMap<String, HashMap<String, String>>,
    current_lang: String,
}

impl I18n {
    pub fn new(lang: &str) -> Self {
        let mut translations = HashMap::new();

        // English
        let mut en = HashMap::new();
        // Replies to the requester
        en.insert("task_complete".to_string(), "✅ Task complete!".to_string());
        en.insert("execution_result".to_string(), "📤 Result:".to_string());
        en.insert("no_output".to_string(), "Snippet finished without files, images or text output.".to_string());
        en.insert("execution_failed".to_string(), "❌ Execution failed!".to_string());
        en.insert("error_info".to_string(), "Error:".to_string());
        en.insert("output_before_error".to_string(), "Output before the failure:".to_string());
        en.insert("retry_hint".to_string(), "Analyse the error, fix the code and try again.".to_string());
        en.insert("timeout_error".to_string(), "Execution timed out (over {0} seconds)".to_string());
        en.insert("unauthorized".to_string(), "⛔ {0} is not allowed to run code.".to_string());
        // Delivery summary
        en.insert("delivery_header".to_string(), "📎 Files:".to_string());
        en.insert("delivered_via".to_string(), "✔ {0} via {1}".to_string());
        en.insert("delivery_failed".to_string(), "✘ {0} not delivered: {1}".to_string());
        en.insert("artifact_missing".to_string(), "🤔 {0} does not exist, skipped".to_string());
        // CLI
        en.insert("record_saved".to_string(), "History record #{0} saved".to_string());
        en.insert("record_not_saved".to_string(), "History record could not be saved".to_string());
        en.insert("no_records".to_string(), "No records found".to_string());
        en.insert("history_page".to_string(), "Page {0}/{1}, {2} records".to_string());
        en.insert("stats_total".to_string(), "Total executions".to_string());
        en.insert("stats_success".to_string(), "Succeeded".to_string());
        en.insert("stats_failure".to_string(), "Failed".to_string());
        en.insert("stats_rate".to_string(), "Success rate".to_string());
        en.insert("stats_avg".to_string(), "Average duration".to_string());
        en.insert("stats_users".to_string(), "Requesters".to_string());
        en.insert("stats_recent".to_string(), "Last 7 days".to_string());
        en.insert("server_listening".to_string(), "Serving on {0}".to_string());

        // Chinese
        let mut zh = HashMap::new();
        zh.insert("task_complete".to_string(), "✅ 任务完成！".to_string());
        zh.insert("execution_result".to_string(), "📤 执行结果：".to_string());
        zh.insert("no_output".to_string(), "代码执行完成，但无文件、图片或文本输出。".to_string());
        zh.insert("execution_failed".to_string(), "❌ 代码执行失败！".to_string());
        zh.insert("error_info".to_string(), "错误信息：".to_string());
        zh.insert("output_before_error".to_string(), "出错前输出：".to_string());
        zh.insert("retry_hint".to_string(), "请分析错误信息，修正代码或调整逻辑后重试。".to_string());
        zh.insert("timeout_error".to_string(), "代码执行超时（超过 {0} 秒）".to_string());
        zh.insert("unauthorized".to_string(), "⛔ {0} 没有执行代码的权限。".to_string());
        zh.insert("delivery_header".to_string(), "📎 文件：".to_string());
        zh.insert("delivered_via".to_string(), "✔ {0} 已通过 {1} 发送".to_string());
        zh.insert("delivery_failed".to_string(), "✘ {0} 发送失败：{1}".to_string());
        zh.insert("artifact_missing".to_string(), "🤔 {0} 不存在，已跳过".to_string());
        zh.insert("record_saved".to_string(), "已保存历史记录 #{0}".to_string());
        zh.insert("record_not_saved".to_string(), "历史记录保存失败".to_string());
        zh.insert("no_records".to_string(), "没有找到记录".to_string());
        zh.insert("history_page".to_string(), "第 {0}/{1} 页，共 {2} 条记录".to_string());
        zh.insert("stats_total".to_string(), "总执行次数".to_string());
        zh.insert("stats_success".to_string(), "成功".to_string());
        zh.insert("stats_failure".to_string(), "失败".to_string());
        zh.insert("stats_rate".to_string(), "成功率".to_string());
        zh.insert("stats_avg".to_string(), "平均耗时".to_string());
        zh.insert("stats_users".to_string(), "用户数".to_string());
        zh.insert("stats_recent".to_string(), "最近 7 天".to_string());
        zh.insert("server_listening".to_string(), "服务地址：{0}".to_string());

        translations.insert("en".to_string(), en);
        translations.insert("zh".to_string(), zh);

        let current_lang = if lang.starts_with("zh") {
            "zh".to_string()
        } else {
            "en".to_string()
        };

        Self {
            translations,
            current_lang,
        }
    }

    pub fn t(&self, key: &str) -> String {
        self.translations
            .get(&self.current_lang)
            .and_then(|lang_map| lang_map.get(key))
            .or_else(|| self.translations.get("en").and_then(|en| en.get(key)))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// Fills `{0}`, `{1}`, ... in one pass, so placeholders inside arguments stay literal.
    pub fn t_format(&self, key: &str, args: &[&str]) -> String {
        static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
        let placeholder = PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\d+)\}").expect("valid placeholder pattern"));

        placeholder
            .replace_all(&self.t(key), |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| args.get(i))
                    .map(|arg| arg.to_string())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}
