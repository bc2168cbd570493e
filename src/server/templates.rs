// LinkedOut — Inline HTML pages
//
// The landing and login pages are served as string constants; the login
// form posts JSON to `/login` and follows up to the inbox.

pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>LinkedOut</title>
</head>
<body>
  <main>
    <h1>LinkedOut</h1>
    <p>Triage your LinkedIn direct messages.</p>
    <a href="/login">Sign in</a>
  </main>
</body>
</html>
"#;

pub const LOGIN_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>LinkedOut · Sign in</title>
</head>
<body>
  <main>
    <h1>Sign in</h1>
    <form id="login">
      <input name="email" type="email" placeholder="Email" required>
      <input name="password" type="password" placeholder="Password" required>
      <button type="submit">Sign in</button>
    </form>
    <p id="error" role="alert"></p>
  </main>
  <script>
    document.getElementById('login').addEventListener('submit', async (e) => {
      e.preventDefault();
      const form = new FormData(e.target);
      const res = await fetch('/login', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({ email: form.get('email'), password: form.get('password') }),
      });
      if (res.ok) {
        window.location.href = '/inbox';
      } else {
        const data = await res.json().catch(() => ({}));
        document.getElementById('error').textContent = data.error || 'Login failed';
      }
    });
  </script>
</body>
</html>
"#;
