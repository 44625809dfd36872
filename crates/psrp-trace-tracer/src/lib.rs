//! `CommandTracer`: the peripheral presentation layer (§4.7). Consumes
//! fully-parsed [`PsrpMessage`]s and performs best-effort CLIXML
//! interpretation of three message types to produce a human-readable
//! transcript, grounded line-by-line on the source's
//! `SimpleCommandTracer`. Everything this crate cannot interpret is tagged
//! with its raw markup, never dropped silently and never a hard error —
//! this layer does not participate in the core's reassembly invariants.

mod primitive;
mod xmlpath;

use psrp_trace_psrp::{MessageType, PsrpMessage};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use primitive::primitive_value;

/// One line of transcript output. `newline` mirrors the source's choice
/// between `print(x)` and `print(x, end='', flush=True)` — `Write2` and an
/// in-progress prompt string are emitted without a trailing newline so a
/// caller can concatenate same-line writes the way a real terminal would.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedLine {
    pub text: String,
    pub newline: bool,
}

impl TracedLine {
    fn line(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            newline: true,
        }
    }

    fn inline(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            newline: false,
        }
    }
}

/// Interprets CLIXML-encoded PSRP message bodies into human-readable
/// transcript lines. Stateful only in the one way the source is: a
/// one-shot flag armed by the bare `prompt` command, consumed by the next
/// `PIPELINE_OUTPUT`.
#[derive(Debug, Default)]
pub struct CommandTracer {
    prompt_incoming: bool,
}

impl CommandTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret one message. Message types this tracer doesn't cover
    /// (session/runspace-pool housekeeping, pipeline state, records, ...)
    /// produce no output and are not logged — only a wire-level type this
    /// pipeline can't even recognize is.
    pub fn handle(&mut self, msg: &PsrpMessage) -> Vec<TracedLine> {
        let data = match msg.body_str() {
            Ok(data) => data,
            Err(err) => {
                error!(%err, "PSRP message body is not valid UTF-8");
                return Vec::new();
            }
        };

        match msg.message_type() {
            MessageType::CreatePipeline => self.create_pipeline(data, msg.rpid, msg.pid, msg.destination),
            MessageType::PipelineHostCall => self.pipeline_host_call(data, msg.rpid, msg.pid, msg.destination),
            MessageType::PipelineOutput => self.pipeline_output(data, msg.rpid, msg.pid, msg.destination),
            MessageType::Unknown(code) => {
                error!(code, "unrecognized MessageType");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn create_pipeline(&mut self, data: &str, rpid: Uuid, pid: Option<Uuid>, destination: u32) -> Vec<TracedLine> {
        if data.is_empty() {
            warn!(%rpid, ?pid, destination, "empty message data in CREATE_PIPELINE");
            return Vec::new();
        }
        let doc = match roxmltree::Document::parse(data) {
            Ok(doc) => doc,
            Err(err) => {
                error!(%err, "CREATE_PIPELINE body is not well-formed XML");
                return Vec::new();
            }
        };
        let Some(lst) = xmlpath::find(doc.root_element(), "MS/Obj[@N='PowerShell']/MS/Obj[@N='Cmds']/LST") else {
            return Vec::new();
        };

        let mut extra_lines = Vec::new();
        let mut parsed_cmds = Vec::new();
        for cmd_obj in xmlpath::elements(lst) {
            let Some(ms) = xmlpath::find(cmd_obj, "MS") else { continue };
            let Some(cmd_text) = xmlpath::find(ms, "S[@N='Cmd']").and_then(|n| n.text()) else {
                continue;
            };

            // The bare `prompt` command just arms the "next output is the
            // prompt string" flag; the source abandons the rest of this
            // message entirely when it sees it, so we do too.
            if cmd_text == "prompt" {
                self.prompt_incoming = true;
                return Vec::new();
            }

            let mut final_cmd_str = vec![psrp_trace_psrp::deserialize_string(cmd_text)];
            if let Some(args) = xmlpath::find(ms, "Obj[@N='Args']") {
                if let Some(args_lst) = xmlpath::find(args, "LST") {
                    collect_cmd_args(args_lst, &mut final_cmd_str, &mut extra_lines);
                }
            }
            parsed_cmds.push(final_cmd_str.join(" "));
        }

        let full_cmd_str = parsed_cmds.join(" | ");
        info!(%rpid, ?pid, destination, command = %full_cmd_str, "CREATE_PIPELINE");
        extra_lines.push(TracedLine::line(full_cmd_str));
        extra_lines
    }

    fn pipeline_host_call(&mut self, data: &str, rpid: Uuid, pid: Option<Uuid>, destination: u32) -> Vec<TracedLine> {
        if data.is_empty() {
            warn!(%rpid, ?pid, destination, "empty message data in PIPELINE_HOST_CALL");
            return Vec::new();
        }
        let doc = match roxmltree::Document::parse(data) {
            Ok(doc) => doc,
            Err(err) => {
                error!(%err, "PIPELINE_HOST_CALL body is not well-formed XML");
                return Vec::new();
            }
        };
        let root = doc.root_element();
        let Some(method) = xmlpath::find(root, "MS/Obj[@N='mi']/ToString").and_then(|n| n.text()) else {
            error!(%rpid, ?pid, destination, "could not find method identifier in PIPELINE_HOST_CALL");
            return Vec::new();
        };

        // [MS-PSRP] 2.2.3.17 defines many more host-call methods; only the
        // ones the source bothered to interpret are handled here.
        match method {
            "WriteLine2" => self.write_line2(root, rpid, pid, destination),
            "Write2" => self.write_with_colors(root, false, "Write2", rpid, pid, destination),
            "WriteLine3" => self.write_with_colors(root, true, "WriteLine3", rpid, pid, destination),
            "SetShouldExit" => Vec::new(),
            other => {
                warn!(%rpid, ?pid, destination, method = other, "unsupported PIPELINE_HOST_CALL method");
                vec![TracedLine::line(format!("[Unsupported PIPELINE_HOST_CALL method: {other}]"))]
            }
        }
    }

    fn write_line2(&self, root: roxmltree::Node, rpid: Uuid, pid: Option<Uuid>, destination: u32) -> Vec<TracedLine> {
        let Some(output_lst) = xmlpath::find(root, "MS/Obj[@N='mp']/LST") else {
            debug!(%rpid, ?pid, destination, "WriteLine2() called with no arguments");
            return Vec::new();
        };
        let mut lines = Vec::new();
        for elem in xmlpath::elements(output_lst) {
            if let Some(output) = primitive_value(elem) {
                info!(%rpid, ?pid, destination, %output, "WriteLine2");
                lines.push(TracedLine::line(output));
            }
        }
        lines
    }

    fn write_with_colors(
        &self,
        root: roxmltree::Node,
        newline: bool,
        method_name: &str,
        rpid: Uuid,
        pid: Option<Uuid>,
        destination: u32,
    ) -> Vec<TracedLine> {
        let Some(method_args) = xmlpath::find(root, "MS/Obj[@N='mp']/LST") else {
            debug!(%rpid, ?pid, destination, method_name, "called with no arguments");
            return Vec::new();
        };
        let args: Vec<_> = xmlpath::elements(method_args).collect();
        if args.len() < 3 {
            error!(
                %rpid, ?pid, destination, method_name,
                expected = 3, got = args.len(),
                "called with unexpected number of arguments"
            );
            return Vec::new();
        }
        // args[0] and args[1] are background/foreground colour, unsupported here.
        let Some(output) = primitive_value(args[2]) else {
            return Vec::new();
        };
        info!(%rpid, ?pid, destination, method_name, %output);
        vec![TracedLine {
            text: output,
            newline,
        }]
    }

    fn pipeline_output(&mut self, data: &str, rpid: Uuid, pid: Option<Uuid>, destination: u32) -> Vec<TracedLine> {
        if data.is_empty() {
            info!(%rpid, ?pid, destination, "empty message data in PIPELINE_OUTPUT");
            return Vec::new();
        }
        let doc = match roxmltree::Document::parse(data) {
            Ok(doc) => doc,
            Err(err) => {
                error!(%err, "PIPELINE_OUTPUT body is not well-formed XML");
                return Vec::new();
            }
        };
        let root = doc.root_element();

        if self.prompt_incoming {
            self.prompt_incoming = false;
            if root.tag_name().name() != "S" {
                warn!(%rpid, ?pid, destination, "unsupported type received for prompt");
                return vec![TracedLine::line(format!("[UNSUPPORTED TYPE RECEIVED FOR PROMPT]:\n{data}"))];
            }
            let Some(text) = root.text() else { return Vec::new() };
            let prompt = psrp_trace_psrp::deserialize_and_unescape(text);
            info!(%rpid, ?pid, destination, %prompt);
            return vec![TracedLine::inline(prompt)];
        }

        if let Some(tn) = xmlpath::find(root, "TN") {
            let Some(first) = xmlpath::elements(tn).next() else { return Vec::new() };
            return match first.text() {
                // Neither of these is believed relevant to a simple command trace.
                Some("Selected.Microsoft.PowerShell.Commands.GenericMeasureInfo") => Vec::new(),
                Some("Selected.System.Management.Automation.CmdletInfo") => Vec::new(),
                Some("Selected.System.Management.ManagementObject") => self.output_management_object(root, rpid, pid, destination),
                _ => {
                    warn!(%rpid, ?pid, destination, "unsupported type in PIPELINE_OUTPUT");
                    vec![TracedLine::line(format!("[UNSUPPORTED TYPE RECEIVED]:\n{data}"))]
                }
            };
        }

        // Most complex types are not supported; only primitive [MS-PSRP]
        // 2.2.5.1 shapes are decoded here.
        let Some(output) = primitive_value(root) else { return Vec::new() };
        info!(%rpid, ?pid, destination, tag = root.tag_name().name(), %output);
        vec![TracedLine::line(output)]
    }

    fn output_management_object(&self, root: roxmltree::Node, rpid: Uuid, pid: Option<Uuid>, destination: u32) -> Vec<TracedLine> {
        let Some(ms) = xmlpath::find(root, "MS") else { return Vec::new() };
        let mut lines = Vec::new();
        for item in xmlpath::elements(ms) {
            if item.tag_name().name() != "S" {
                warn!(%rpid, ?pid, destination, "unsupported type in ManagementObject output");
                lines.push(TracedLine::line(format!("[UNSUPPORTED TYPE RECEIVED]: {}", xmlpath::outer_xml(item))));
                continue;
            }
            let value = item.text().unwrap_or("");
            match item.attribute("N").map(psrp_trace_psrp::deserialize_string) {
                Some(prop_name) => {
                    info!(%rpid, ?pid, destination, property = %prop_name, %value);
                    lines.push(TracedLine::line(format!("{prop_name}: {value}")));
                }
                None => {
                    info!(%rpid, ?pid, destination, %value);
                    lines.push(TracedLine::line(value.to_string()));
                }
            }
        }
        lines
    }
}

fn collect_cmd_args(args_lst: roxmltree::Node, final_cmd_str: &mut Vec<String>, extra_lines: &mut Vec<TracedLine>) {
    for arg_obj in xmlpath::elements(args_lst) {
        let Some(ms) = xmlpath::find(arg_obj, "MS") else { continue };
        for elem in xmlpath::elements(ms) {
            match elem.tag_name().name() {
                "Nil" => {}
                "S" => {
                    if let Some(text) = elem.text() {
                        let arg = psrp_trace_psrp::deserialize_string(text);
                        final_cmd_str.push(quote_if_whitespace(&arg));
                    }
                }
                "Obj" => {
                    if let Some(inner_lst) = xmlpath::find(elem, "LST") {
                        let values: Vec<String> = xmlpath::elements(inner_lst)
                            .filter(|item| item.tag_name().name() == "S")
                            .filter_map(|item| item.text())
                            .map(psrp_trace_psrp::deserialize_string)
                            .collect();
                        if !values.is_empty() {
                            final_cmd_str.push(quote_if_whitespace(&values.join(",")));
                        }
                    }
                }
                other => {
                    warn!(tag = other, "unsupported type in args list of a cmd in CREATE_PIPELINE");
                    extra_lines.push(TracedLine::line(format!("[UNSUPPORTED ARG TYPE RECEIVED]: {}", xmlpath::outer_xml(elem))));
                }
            }
        }
    }
}

fn quote_if_whitespace(value: &str) -> String {
    if value.trim().contains(' ') {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn message(message_type: u32, data: &[u8]) -> PsrpMessage {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&message_type.to_le_bytes());
        raw.extend_from_slice(&Uuid::new_v4().to_bytes_le());
        raw.extend_from_slice(&Uuid::nil().to_bytes_le());
        raw.extend_from_slice(data);
        PsrpMessage::parse(&raw).unwrap()
    }

    #[test]
    fn create_pipeline_extracts_command_and_arg() {
        let xml = r#"<Obj><MS>
            <Obj N="PowerShell"><MS>
                <Obj N="Cmds"><LST>
                    <Obj><MS>
                        <S N="Cmd">Get-Process</S>
                        <Obj N="Args"><LST>
                            <Obj><MS><S>explorer</S></MS></Obj>
                        </LST></Obj>
                    </MS></Obj>
                </LST></Obj>
            </MS></Obj>
        </MS></Obj>"#;
        let msg = message(0x0002_1006, xml.as_bytes());
        let mut tracer = CommandTracer::new();
        let lines = tracer.handle(&msg);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Get-Process explorer");
        assert!(lines[0].newline);
    }

    #[test]
    fn prompt_command_arms_flag_and_produces_no_output() {
        let xml = r#"<Objs><Obj N="MS"><MS>
            <Obj N="PowerShell"><MS>
                <Obj N="Cmds"><LST>
                    <Obj><MS><S N="Cmd">prompt</S></MS></Obj>
                </LST></Obj>
            </MS></Obj>
        </MS></Obj></Objs>"#;
        let msg = message(0x0002_1006, xml.as_bytes());
        let mut tracer = CommandTracer::new();
        let lines = tracer.handle(&msg);
        assert!(lines.is_empty());
        assert!(tracer.prompt_incoming);
    }

    #[test]
    fn pipeline_output_after_prompt_flag_prints_inline() {
        let mut tracer = CommandTracer::new();
        tracer.prompt_incoming = true;
        let msg = message(0x0004_1004, b"<S>PS C:\\&gt; </S>");
        let lines = tracer.handle(&msg);
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].newline);
        assert_eq!(lines[0].text, "PS C:\\> ");
        assert!(!tracer.prompt_incoming);
    }

    #[test]
    fn pipeline_output_primitive_type() {
        let mut tracer = CommandTracer::new();
        let msg = message(0x0004_1004, b"<I32>42</I32>");
        let lines = tracer.handle(&msg);
        assert_eq!(lines, vec![TracedLine::line("42")]);
    }

    #[test]
    fn unrecognized_message_type_is_logged_and_ignored() {
        let mut tracer = CommandTracer::new();
        let msg = message(0xDEAD_BEEF, b"");
        assert!(tracer.handle(&msg).is_empty());
    }

    #[test]
    fn write_line2_host_call_emits_each_argument() {
        let xml = r#"<Objs><Obj N="MS"><MS>
            <Obj N="mi"><ToString>WriteLine2</ToString></Obj>
            <Obj N="mp"><LST>
                <S>hello</S>
                <S>world</S>
            </LST></Obj>
        </MS></Obj></Objs>"#;
        let msg = message(0x0004_1100, xml.as_bytes());
        let mut tracer = CommandTracer::new();
        let lines = tracer.handle(&msg);
        assert_eq!(lines, vec![TracedLine::line("hello"), TracedLine::line("world")]);
    }
}
