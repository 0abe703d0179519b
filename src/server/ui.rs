pub const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>package-doctor</title>
<style>
  body { font-family: system-ui, sans-serif; max-width: 960px; margin: 2rem auto; padding: 0 1rem; }
  textarea { width: 100%; font-family: ui-monospace, monospace; }
  #log { background: #111; color: #ddd; padding: 1rem; white-space: pre-wrap; min-height: 8rem; }
  .stage { color: #7fd; } .warning { color: #fc6; } .error { color: #f77; }
  pre.result { background: #f4f4f4; padding: 1rem; white-space: pre-wrap; }
</style>
</head>
<body>
<h1>package-doctor</h1>
<form id="run">
  <label>Error log<br><textarea name="text" rows="8" required></textarea></label>
  <label>requirements.txt (optional)<br><textarea name="requirements" rows="6"></textarea></label>
  <label>Session id (optional) <input name="session_id"></label>
  <button type="submit">Resolve</button>
</form>
<h2>Progress</h2>
<div id="log"></div>
<h2>Result</h2>
<pre class="result" id="result"></pre>
<script>
const log = document.getElementById('log');
const result = document.getElementById('result');

function line(text, cls) {
  const div = document.createElement('div');
  if (cls) div.className = cls;
  div.textContent = text;
  log.appendChild(div);
}

function handle(name, data) {
  const payload = JSON.parse(data);
  if (name === 'stage_started') line('> ' + payload.stage, 'stage');
  else if (name === 'stage_completed') line('  done ' + payload.stage + ' (' + payload.elapsed_ms + ' ms)', 'stage');
  else if (name === 'agent_message') line('[' + payload.agent + '] ' + payload.content);
  else if (name === 'warning') line('! ' + payload.message, 'warning');
  else if (name === 'error') line('x ' + payload.error, 'error');
  else if (name === 'report') result.textContent = payload.candidate.raw + '\n\n' + payload.candidate.explanation
    + (payload.issues.length ? '\n\nOutstanding issues:\n- ' + payload.issues.join('\n- ') : '');
}

document.getElementById('run').addEventListener('submit', async (e) => {
  e.preventDefault();
  log.textContent = ''; result.textContent = '';
  const form = new FormData(e.target);
  const body = { text: form.get('text'), requirements: form.get('requirements') || null, session_id: form.get('session_id') || null };
  const response = await fetch('/api/run_sse', { method: 'POST', headers: { 'Content-Type': 'application/json' }, body: JSON.stringify(body) });
  if (!response.ok) { line('x ' + (await response.text()), 'error'); return; }
  const reader = response.body.getReader();
  const decoder = new TextDecoder();
  let buffer = '';
  for (;;) {
    const { value, done } = await reader.read();
    if (done) break;
    buffer += decoder.decode(value, { stream: true });
    let index;
    while ((index = buffer.indexOf('\n\n')) >= 0) {
      const chunk = buffer.slice(0, index); buffer = buffer.slice(index + 2);
      let name = 'message', data = '';
      for (const l of chunk.split('\n')) {
        if (l.startsWith('event:')) name = l.slice(6).trim();
        else if (l.startsWith('data:')) data += l.slice(5).trim();
      }
      if (data) handle(name, data);
    }
  }
});
</script>
</body>
</html>
"#;
